//! Configuration the query layer reads: aggregate overrides, their settings,
//! and how strings are ordered.

use crate::vm::{table::Table, value::Value};
use hashbrown::HashMap;
use icu_collator::{CaseLevel, Collator, CollatorOptions, Numeric, Strength};
use icu_locid::Locale;
use log::warn;
use std::{
	cmp::Ordering,
	fmt::{Debug, Formatter, Result as FMTResult},
	sync::Arc
};

/// Looks up configuration values by key, such as `queryCollation` or
/// `aggregates.sum`.
pub trait ConfigProvider: Send + Sync {
	fn get(&self, key: &str) -> Option<Value>;
}

impl ConfigProvider for HashMap<String, Value> {
	fn get(&self, key: &str) -> Option<Value> {
		HashMap::get(self, key).cloned()
	}
}

/// Reads configuration out of a Lua table. Dotted keys walk nested tables,
/// so `aggregates.sum` is `config.aggregates.sum`.
pub struct TableConfig(pub Arc<Table>);

impl ConfigProvider for TableConfig {
	fn get(&self, key: &str) -> Option<Value> {
		let mut value = Value::Table(self.0.clone());
		for part in key.split('.') {
			value = match value {
				Value::Table(table) => table.get_str(part),
				_ => return None
			};
		}
		(!value.is_nil()).then_some(value)
	}
}

/// The configuration of one runtime. Without a provider every lookup misses,
/// leaving built in aggregates and code point ordering.
#[derive(Clone, Default)]
pub struct Config {
	provider: Option<Arc<dyn ConfigProvider>>
}

impl Config {
	pub fn new(provider: Arc<dyn ConfigProvider>) -> Self {
		Self {provider: Some(provider)}
	}

	pub fn get(&self, key: &str) -> Option<Value> {
		self.provider.as_ref().and_then(|provider| provider.get(key))
	}

	/// The `queryCollation` setting.
	pub fn collation(&self) -> Collation {
		let table = match self.get("queryCollation") {
			Some(Value::Table(table)) => table,
			Some(other) => {
				warn!("ignoring queryCollation, expected a table but got a {}", other.type_name());
				return Collation::default()
			},
			None => return Collation::default()
		};

		let mut collation = Collation {
			enabled: table.get_str("enabled").coerce_to_bool(),
			locale: table.get_str("locale").string().map(str::to_owned),
			..Collation::default()
		};
		if let Value::Table(options) = table.get_str("options") {
			for (key, value) in options.pairs() {
				match (key.string(), &value) {
					(Some("sensitivity"), Value::String(sensitivity)) =>
						match Sensitivity::from_name(sensitivity) {
							Some(sensitivity) => collation.sensitivity = sensitivity,
							None => warn!("ignoring unknown collation sensitivity '{}'", sensitivity)
						},
					(Some("numeric"), _) => collation.numeric = value.coerce_to_bool(),
					_ => warn!("ignoring collation option {}", key)
				}
			}
		}
		collation
	}

	/// The `aggregateConfig.<name>` setting, handed to aggregates as
	/// `ctx.config`.
	pub fn aggregate_config(&self, name: &str) -> Value {
		self.get(&format!("aggregateConfig.{}", name))
			.unwrap_or_else(|| Table::new().into())
	}
}

impl Debug for Config {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		f.debug_struct("Config")
			.field("provider", &self.provider.as_ref().map(|_| "..."))
			.finish()
	}
}

/// Which differences between strings matter when ordering.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Sensitivity {
	/// Only letters differ: `a = A`, `a = á`.
	Base,
	/// Letters and accents: `a < á`, `a = A`.
	Accent,
	/// Letters and case: `a < A`, `a = á`.
	Case,
	#[default]
	Variant
}

impl Sensitivity {
	pub fn from_name(name: &str) -> Option<Self> {
		Some(match name {
			"base" => Self::Base,
			"accent" => Self::Accent,
			"case" => Self::Case,
			"variant" => Self::Variant,
			_ => return None
		})
	}
}

/// Locale aware string ordering settings.
#[derive(Clone, Debug, Default)]
pub struct Collation {
	pub enabled: bool,
	/// A BCP 47 tag. Unset, or unparsable, means the root collation.
	pub locale: Option<String>,
	pub sensitivity: Sensitivity,
	/// Compares runs of digits by value.
	pub numeric: bool
}

impl Collation {
	/// Builds the ordering these settings describe. Falls back to code point
	/// order when collation is disabled or no collator can be built for the
	/// locale.
	pub fn order(&self) -> StringOrder {
		if !self.enabled {return StringOrder::CodePoint}

		let locale = match self.locale.as_deref().map(str::parse::<Locale>) {
			Some(Ok(locale)) => locale,
			Some(Err(error)) => {
				warn!("ignoring collation locale {:?}: {}", self.locale, error);
				Locale::default()
			},
			None => Locale::default()
		};

		let mut options = CollatorOptions::new();
		options.strength = Some(match self.sensitivity {
			Sensitivity::Base | Sensitivity::Case => Strength::Primary,
			Sensitivity::Accent => Strength::Secondary,
			Sensitivity::Variant => Strength::Tertiary
		});
		if self.sensitivity == Sensitivity::Case {
			options.case_level = Some(CaseLevel::On);
		}
		if self.numeric {
			options.numeric = Some(Numeric::On);
		}

		match Collator::try_new(&(&locale).into(), options) {
			Ok(collator) => StringOrder::Collated(Box::new(collator)),
			Err(error) => {
				warn!("no collator for locale {}, using code point order: {}", locale, error);
				StringOrder::CodePoint
			}
		}
	}

	/// Compares two strings. Sorting many strings should build the
	/// [order](Self::order) once instead.
	pub fn compare(&self, a: &str, b: &str) -> Ordering {
		self.order().compare(a, b)
	}
}

/// A ready to use string ordering.
pub enum StringOrder {
	CodePoint,
	Collated(Box<Collator>)
}

impl StringOrder {
	pub fn compare(&self, a: &str, b: &str) -> Ordering {
		match self {
			Self::CodePoint => a.cmp(b),
			Self::Collated(collator) => collator.compare(a, b)
		}
	}
}

impl Debug for StringOrder {
	fn fmt(&self, f: &mut Formatter) -> FMTResult {
		match self {
			Self::CodePoint => write!(f, "CodePoint"),
			Self::Collated(_) => write!(f, "Collated")
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{Collation, Config, ConfigProvider, Sensitivity, TableConfig};
	use crate::{lua_table, vm::value::Value};
	use std::{cmp::Ordering, sync::Arc};

	#[test]
	fn test_table_config_walks_dotted_keys() {
		let provider = TableConfig(lua_table! {
			aggregates = lua_table! {double = lua_table! {name = "double"}}
		}.arc());
		let found = provider.get("aggregates.double").unwrap();
		assert_eq!(found.table().unwrap().get_str("name"), Value::from("double"));
		assert!(provider.get("aggregates.missing").is_none());
		assert!(provider.get("aggregates.double.name.deeper").is_none());
	}

	#[test]
	fn test_default_config_is_empty() {
		let config = Config::default();
		assert!(config.get("queryCollation").is_none());
		assert!(!config.collation().enabled);
		assert_eq!(config.aggregate_config("sum").table().unwrap().length(), 0);
	}

	#[test]
	fn test_collation_settings() {
		let config = Config::new(Arc::new(TableConfig(lua_table! {
			queryCollation = lua_table! {
				enabled = true,
				locale = "en",
				options = lua_table! {sensitivity = "base", numeric = true}
			}
		}.arc())));
		let collation = config.collation();
		assert!(collation.enabled);
		assert_eq!(collation.locale.as_deref(), Some("en"));
		assert_eq!(collation.sensitivity, Sensitivity::Base);
		assert_eq!(collation.compare("Apple", "apple"), Ordering::Equal);
		assert_eq!(collation.compare("item 9", "item 10"), Ordering::Less);
	}

	#[test]
	fn test_collation_orders() {
		let disabled = Collation::default();
		assert_eq!(disabled.compare("B", "a"), Ordering::Less);

		let enabled = Collation {enabled: true, ..Collation::default()};
		assert_eq!(enabled.compare("a", "B"), Ordering::Less);
		assert_eq!(enabled.compare("a", "A"), Ordering::Less);
		assert_eq!(enabled.compare("item 9", "item 10"), Ordering::Greater);
	}

	#[test]
	fn test_collation_follows_the_locale() {
		let french = Collation {enabled: true, locale: Some("fr".into()), ..Collation::default()};
		let order = french.order();
		let mut words = vec!["f", "é", "e", "z"];
		words.sort_by(|a, b| order.compare(a, b));
		assert_eq!(words, ["e", "é", "f", "z"]);

		let swedish = Collation {enabled: true, locale: Some("sv".into()), ..Collation::default()};
		assert_eq!(swedish.compare("ö", "z"), Ordering::Greater);
		let german = Collation {enabled: true, locale: Some("de".into()), ..Collation::default()};
		assert_eq!(german.compare("ö", "z"), Ordering::Less);

		let broken = Collation {enabled: true, locale: Some("not a locale!".into()),
			..Collation::default()};
		assert_eq!(broken.compare("a", "B"), Ordering::Less);
	}

	#[test]
	fn test_collation_sensitivity() {
		let with = |sensitivity| Collation {enabled: true, sensitivity, ..Collation::default()};
		assert_eq!(with(Sensitivity::Base).compare("a", "Á"), Ordering::Equal);
		assert_eq!(with(Sensitivity::Accent).compare("a", "A"), Ordering::Equal);
		assert_eq!(with(Sensitivity::Accent).compare("a", "á"), Ordering::Less);
		assert_eq!(with(Sensitivity::Case).compare("a", "á"), Ordering::Equal);
		assert_eq!(with(Sensitivity::Case).compare("a", "A"), Ordering::Less);
		assert_eq!(with(Sensitivity::Variant).compare("á", "A"), Ordering::Greater);
	}
}

//! Lua patterns.
//!
//! Patterns work on bytes, as they do in the reference implementation.
//! Character classes only know ASCII, everything else matches literally.

use std::ops::Range;

const MAX_CAPTURES: usize = 32;
const MAX_RECURSION: usize = 200;

pub type PatternResult<T> = Result<T, String>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Capture {
	Text(Range<usize>),
	/// An empty capture, `()`, captures its one based position.
	Position(usize)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Match {
	pub start: usize,
	pub end: usize,
	/// The explicit captures of the pattern, empty if it has none.
	pub captures: Vec<Capture>
}

impl Match {
	/// The captures, or the whole match if the pattern has none.
	pub fn values(&self) -> Vec<Capture> {
		if self.captures.is_empty() {
			vec![Capture::Text(self.start..self.end)]
		} else {
			self.captures.clone()
		}
	}
}

#[derive(Clone, Copy)]
enum Length {
	Open,
	Position,
	Closed(usize)
}

struct Matcher<'s> {
	subject: &'s [u8],
	pattern: &'s [u8],
	depth: usize,
	captures: Vec<(usize, Length)>
}

impl<'s> Matcher<'s> {
	fn new(subject: &'s [u8], pattern: &'s [u8]) -> Self {
		Self {subject, pattern, depth: 0, captures: Vec::new()}
	}

	/// Tries to match the pattern from `p` against the subject from `s`,
	/// returning where the match ends.
	fn do_match(&mut self, s: usize, p: usize) -> PatternResult<Option<usize>> {
		self.depth += 1;
		if self.depth > MAX_RECURSION {
			return Err("pattern too complex".to_owned())
		}
		let result = self.match_here(s, p);
		self.depth -= 1;
		result
	}

	fn match_here(&mut self, mut s: usize, mut p: usize) -> PatternResult<Option<usize>> {
		loop {
			let Some(&current) = self.pattern.get(p) else {return Ok(Some(s))};
			let next = self.pattern.get(p + 1).copied();

			match (current, next) {
				(b'(', Some(b')')) => return self.start_capture(s, p + 2, Length::Position),
				(b'(', _) => return self.start_capture(s, p + 1, Length::Open),
				(b')', _) => return self.end_capture(s, p + 1),
				(b'$', None) => return Ok((s == self.subject.len()).then_some(s)),

				(b'%', Some(b'b')) => match self.match_balance(s, p + 2)? {
					Some(end) => {s = end; p += 4},
					None => return Ok(None)
				},

				(b'%', Some(b'f')) => {
					p += 2;
					if self.pattern.get(p) != Some(&b'[') {
						return Err("missing '[' after '%f' in pattern".to_owned())
					}
					let end = self.class_end(p)?;
					let previous = if s == 0 {0} else {self.subject[s - 1]};
					let current = self.subject.get(s).copied().unwrap_or(0);
					if self.match_set(previous, p, end - 1) || !self.match_set(current, p, end - 1) {
						return Ok(None)
					}
					p = end;
				},

				(b'%', Some(digit)) if digit.is_ascii_digit() =>
						match self.match_back_reference(s, digit)? {
					Some(end) => {s = end; p += 2},
					None => return Ok(None)
				},

				_ => {
					let end = self.class_end(p)?;
					let matches = s < self.subject.len()
						&& self.single_match(self.subject[s], p, end);

					match self.pattern.get(end) {
						Some(b'?') => {
							if matches {
								if let Some(result) = self.do_match(s + 1, end + 1)? {
									return Ok(Some(result))
								}
							}
							p = end + 1;
						},
						Some(b'+') => return match matches {
							true => self.max_expand(s + 1, p, end),
							false => Ok(None)
						},
						Some(b'*') => return self.max_expand(s, p, end),
						Some(b'-') => return self.min_expand(s, p, end),
						_ if matches => {s += 1; p = end},
						_ => return Ok(None)
					}
				}
			}
		}
	}

	/// Where the single character class starting at `p` ends.
	fn class_end(&self, mut p: usize) -> PatternResult<usize> {
		let current = self.pattern[p];
		p += 1;
		match current {
			b'%' if p >= self.pattern.len() =>
				Err("malformed pattern (ends with '%')".to_owned()),
			b'%' => Ok(p + 1),
			b'[' => {
				if self.pattern.get(p) == Some(&b'^') {p += 1}
				// The first character is part of the set even if it is a ']'.
				loop {
					let Some(&current) = self.pattern.get(p) else {
						return Err("malformed pattern (missing ']')".to_owned())
					};
					p += 1;
					if current == b'%' {p += 1}
					if self.pattern.get(p) == Some(&b']') {return Ok(p + 1)}
				}
			},
			_ => Ok(p)
		}
	}

	fn single_match(&self, character: u8, p: usize, end: usize) -> bool {
		match self.pattern[p] {
			b'.' => true,
			b'%' => match_class(character, self.pattern[p + 1]),
			b'[' => self.match_set(character, p, end - 1),
			literal => literal == character
		}
	}

	/// Matches a `[set]` spanning `p` to the closing bracket at `end`.
	fn match_set(&self, character: u8, mut p: usize, end: usize) -> bool {
		p += 1;
		let negated = self.pattern.get(p) == Some(&b'^');
		if negated {p += 1}

		while p < end {
			let current = self.pattern[p];
			if current == b'%' && p + 1 < end {
				p += 1;
				if match_class(character, self.pattern[p]) {return !negated}
				p += 1;
			} else if self.pattern.get(p + 1) == Some(&b'-') && p + 2 < end {
				if current <= character && character <= self.pattern[p + 2] {return !negated}
				p += 3;
			} else {
				if current == character {return !negated}
				p += 1;
			}
		}

		negated
	}

	fn max_expand(&mut self, s: usize, p: usize, end: usize) -> PatternResult<Option<usize>> {
		let mut count = 0;
		while s + count < self.subject.len() && self.single_match(self.subject[s + count], p, end) {
			count += 1;
		}
		loop {
			if let Some(result) = self.do_match(s + count, end + 1)? {return Ok(Some(result))}
			if count == 0 {return Ok(None)}
			count -= 1;
		}
	}

	fn min_expand(&mut self, mut s: usize, p: usize, end: usize)
			-> PatternResult<Option<usize>> {
		loop {
			if let Some(result) = self.do_match(s, end + 1)? {return Ok(Some(result))}
			if s < self.subject.len() && self.single_match(self.subject[s], p, end) {
				s += 1;
			} else {
				return Ok(None)
			}
		}
	}

	fn start_capture(&mut self, s: usize, p: usize, length: Length)
			-> PatternResult<Option<usize>> {
		if self.captures.len() >= MAX_CAPTURES {
			return Err("too many captures".to_owned())
		}
		self.captures.push((s, length));
		let result = self.do_match(s, p)?;
		if result.is_none() {self.captures.pop();}
		Ok(result)
	}

	fn end_capture(&mut self, s: usize, p: usize) -> PatternResult<Option<usize>> {
		let index = self.captures.iter()
			.rposition(|(_, length)| matches!(length, Length::Open))
			.ok_or_else(|| "invalid pattern capture".to_owned())?;
		let start = self.captures[index].0;
		self.captures[index].1 = Length::Closed(s - start);
		let result = self.do_match(s, p)?;
		if result.is_none() {self.captures[index].1 = Length::Open}
		Ok(result)
	}

	fn match_balance(&self, s: usize, p: usize) -> PatternResult<Option<usize>> {
		let (Some(&open), Some(&close)) = (self.pattern.get(p), self.pattern.get(p + 1)) else {
			return Err("malformed pattern (missing arguments to '%b')".to_owned())
		};
		if self.subject.get(s) != Some(&open) {return Ok(None)}

		let mut depth = 1;
		for (index, &character) in self.subject.iter().enumerate().skip(s + 1) {
			if character == close {
				depth -= 1;
				if depth == 0 {return Ok(Some(index + 1))}
			} else if character == open {
				depth += 1;
			}
		}
		Ok(None)
	}

	fn match_back_reference(&self, s: usize, digit: u8) -> PatternResult<Option<usize>> {
		let index = (digit - b'0') as usize;
		let capture = index.checked_sub(1).and_then(|index| self.captures.get(index));
		let Some(&(start, Length::Closed(length))) = capture else {
			return Err(format!("invalid capture index %{}", index))
		};

		let captured = &self.subject[start..start + length];
		Ok(self.subject[s..].starts_with(captured).then_some(s + length))
	}

	fn collect(&self) -> PatternResult<Vec<Capture>> {
		self.captures.iter().map(|&(start, length)| match length {
			Length::Closed(length) => Ok(Capture::Text(start..start + length)),
			Length::Position => Ok(Capture::Position(start + 1)),
			Length::Open => Err("unfinished capture".to_owned())
		}).collect()
	}

	/// Matches at exactly `s`.
	fn attempt(&mut self, s: usize, p: usize) -> PatternResult<Option<Match>> {
		self.captures.clear();
		self.depth = 0;
		Ok(match self.do_match(s, p)? {
			Some(end) => Some(Match {start: s, end, captures: self.collect()?}),
			None => None
		})
	}
}

fn match_class(character: u8, class: u8) -> bool {
	let matches = match class.to_ascii_lowercase() {
		b'a' => character.is_ascii_alphabetic(),
		b'c' => character.is_ascii_control(),
		b'd' => character.is_ascii_digit(),
		b'g' => character.is_ascii_graphic(),
		b'l' => character.is_ascii_lowercase(),
		b'p' => character.is_ascii_punctuation(),
		b's' => character.is_ascii_whitespace() || character == 0x0b,
		b'u' => character.is_ascii_uppercase(),
		b'w' => character.is_ascii_alphanumeric(),
		b'x' => character.is_ascii_hexdigit(),
		_ => return class == character
	};
	if class.is_ascii_uppercase() {!matches} else {matches}
}

/// Finds the first match at or after byte `init`.
pub fn find(subject: &str, pattern: &str, init: usize) -> PatternResult<Option<Match>> {
	let (subject, pattern) = (subject.as_bytes(), pattern.as_bytes());
	let anchored = pattern.first() == Some(&b'^');
	let p = if anchored {1} else {0};
	let mut matcher = Matcher::new(subject, pattern);

	let mut s = init;
	while s <= subject.len() {
		if let Some(found) = matcher.attempt(s, p)? {return Ok(Some(found))}
		if anchored {break}
		s += 1;
	}
	Ok(None)
}

/// Every match `string.gmatch` visits. A match may not end where the
/// previous one ended.
pub fn find_all(subject: &str, pattern: &str, init: usize) -> PatternResult<Vec<Match>> {
	let (subject, pattern) = (subject.as_bytes(), pattern.as_bytes());
	let mut matcher = Matcher::new(subject, pattern);
	let mut matches = Vec::new();
	let mut last_end = None;

	let mut s = init;
	while s <= subject.len() {
		match matcher.attempt(s, 0)? {
			Some(found) if Some(found.end) != last_end => {
				s = found.end;
				last_end = Some(found.end);
				matches.push(found);
			},
			_ => s += 1
		}
	}
	Ok(matches)
}

/// The matches `string.gsub` replaces, at most `limit` of them.
pub fn find_replaceable(subject: &str, pattern: &str, limit: Option<usize>)
		-> PatternResult<Vec<Match>> {
	let (subject, pattern) = (subject.as_bytes(), pattern.as_bytes());
	let anchored = pattern.first() == Some(&b'^');
	let p = if anchored {1} else {0};
	let mut matcher = Matcher::new(subject, pattern);
	let mut matches = Vec::new();
	let mut last_end = None;

	let mut s = 0;
	while limit.map_or(true, |limit| matches.len() < limit) {
		match matcher.attempt(s, p)? {
			Some(found) if Some(found.end) != last_end => {
				s = found.end;
				last_end = Some(found.end);
				matches.push(found);
			},
			_ if s < subject.len() => s += 1,
			_ => break
		}
		if anchored {break}
	}
	Ok(matches)
}

/// Whether `pattern` contains any special characters.
pub fn is_plain(pattern: &str) -> bool {
	!pattern.bytes().any(|byte| b"^$*+?.([%-".contains(&byte))
}

#[cfg(test)]
mod tests {
	use super::{Capture, find, find_all, find_replaceable};

	fn texts(subject: &str, pattern: &str) -> Vec<String> {
		find_all(subject, pattern, 0).unwrap().iter()
			.flat_map(|found| found.values())
			.map(|capture| match capture {
				Capture::Text(range) => subject[range].to_owned(),
				Capture::Position(position) => position.to_string()
			})
			.collect()
	}

	#[test]
	fn test_classes_and_repetition() {
		assert_eq!(texts("one two  three", "%a+"), vec!["one", "two", "three"]);
		assert_eq!(texts("a1b22c333", "%d+"), vec!["1", "22", "333"]);
		assert_eq!(texts("x = 10, y = 20", "(%w+) = (%w+)"), vec!["x", "10", "y", "20"]);
		assert_eq!(texts("[[a]] [b]", "%[(.-)%]"), vec!["[a", "b"]);
	}

	#[test]
	fn test_anchors() {
		assert_eq!(find("hello", "^h", 0).unwrap().map(|found| found.end), Some(1));
		assert_eq!(find("hello", "^e", 0).unwrap(), None);
		assert_eq!(find("hello", "lo$", 0).unwrap().map(|found| found.start), Some(3));
	}

	#[test]
	fn test_sets() {
		assert_eq!(texts("a-b_c", "[%w_]+"), vec!["a", "b_c"]);
		assert_eq!(texts("abc123", "[^%d]+"), vec!["abc"]);
		assert_eq!(texts("a]b", "[]]"), vec!["]"]);
		assert_eq!(texts("Hello", "[A-Z]"), vec!["H"]);
	}

	#[test]
	fn test_balance_frontier_and_back_references() {
		assert_eq!(texts("f(a(b)c) d", "%b()"), vec!["(a(b)c)"]);
		assert_eq!(texts("THE (quick) fox", "%f[%a]%a+"), vec!["THE", "quick", "fox"]);
		assert_eq!(texts("say \"hi\" or 'yo'", "([\"'])(.-)%1"), vec!["\"", "hi", "'", "yo"]);
	}

	#[test]
	fn test_position_captures() {
		let found = find("hello", "()ll()", 0).unwrap().unwrap();
		assert_eq!(found.captures, vec![Capture::Position(3), Capture::Position(5)]);
	}

	#[test]
	fn test_empty_matches() {
		assert_eq!(find_replaceable("abc", "x*", None).unwrap().len(), 4);
		assert_eq!(find_all("abc", "x*", 0).unwrap().len(), 4);
		assert_eq!(find_replaceable("hello world", "o", Some(1)).unwrap().len(), 1);
	}

	#[test]
	fn test_malformed_patterns() {
		assert_eq!(find("x", "%", 0).unwrap_err(), "malformed pattern (ends with '%')");
		assert_eq!(find("x", "[a", 0).unwrap_err(), "malformed pattern (missing ']')");
		assert_eq!(find("x", "(x", 0).unwrap_err(), "unfinished capture");
		assert_eq!(find("x", "%1", 0).unwrap_err(), "invalid capture index %1");
	}
}

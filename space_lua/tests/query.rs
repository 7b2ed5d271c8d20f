use space_lua::{
	Runtime,
	query::collection::{KvQueryCollection, MemoryKvStore, into_value},
	vm::value::Value
};
use std::sync::Arc;

fn strings(value: Value) -> Vec<String> {
	value.table().unwrap().array().iter().map(|value| value.to_string()).collect()
}

#[tokio::test]
async fn queries_plain_tables() {
	let runtime = Runtime::new();
	runtime.execute_sync("pages = {
		{name = 'index', size = 10, tags = 'home'},
		{name = 'about', size = 3, tags = 'info'},
		{name = 'contact', size = 7, tags = 'info'}
	}", None).unwrap();

	let names = runtime.evaluate(
		"query[[from p = pages where p.size > 5 order by p.name select p.name]]", None).await.unwrap();
	assert_eq!(strings(names), vec!["contact", "index"]);

	let names = runtime.evaluate(
		"query[[from pages order by size desc select name limit 1]]", None).await.unwrap();
	assert_eq!(strings(names), vec!["index"]);
}

#[test]
fn queries_store_collections() {
	let store = Arc::new(MemoryKvStore::new());
	let key = |parts: &[&str]| parts.iter().map(|part| part.to_string()).collect::<Vec<_>>();
	store.set(key(&["task", "1"]), Value::from("write"));
	store.set(key(&["task", "2"]), Value::from("review"));
	store.set(key(&["note", "1"]), Value::from("ignored"));

	let runtime = Runtime::new();
	runtime.register_raw("tasks",
		into_value(Arc::new(KvQueryCollection::new(store, key(&["task"]))))).unwrap();
	let result = runtime.execute_sync("return query[[from t = tasks order by t]]", None).unwrap();
	assert_eq!(strings(result[0].clone()), vec!["review", "write"]);
}

#[test]
fn custom_query_metamethod() {
	let runtime = Runtime::new();
	let result = runtime.execute_sync("
		local numbers = setmetatable({}, {__query = function() return {3, 1, 2} end})
		return query[[from n = numbers where n > 1 order by n desc]]
	", None).unwrap();
	assert_eq!(strings(result[0].clone()), vec!["3", "2"]);
}

#[tokio::test]
async fn host_collections_can_suspend() {
	let runtime = Runtime::new();
	runtime.register_host("fetch", space_lua::vm::convert::HostFunction::asynchronous("fetch",
		|_| async {
			tokio::task::yield_now().await;
			Ok::<_, String>(serde_json::json!([{"n": 2}, {"n": 1}]))
		})).unwrap();
	let result = runtime.evaluate("query[[from fetch() order by n select n * 10]]", None)
		.await.unwrap();
	assert_eq!(strings(result), vec!["10", "20"]);
}

#[test]
fn missing_from_clause() {
	let error = Runtime::new().execute_sync("return query[[select 1]]", None).unwrap_err();
	assert!(error.to_string().contains("No from clause found."), "{}", error);
}

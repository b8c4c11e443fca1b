//! Built-in demo pipelines, registered into the catalog at startup.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Value};

use parasel_catalog::{Contract, FieldType, RegisterOptions, TaskCatalog, TaskSpec};
use parasel_core::error::Result;
use parasel_engine::{ByArgs, ByKeys, Concurrent, Leaf, LeafInput, Sequence, Step};

/// Register every demo as a stable task.
pub fn register_demos(catalog: &mut TaskCatalog) -> Result<()> {
    let stable = RegisterOptions {
        overwrite: false,
        mark_stable: true,
    };

    catalog.register_with(
        TaskSpec::new("simple", "0.1.0", simple_pipeline())?
            .with_description("x -> (x + 10, x * 2) concurrently -> their sum")
            .with_input(Contract::new().field("x", FieldType::Integer))
            .produces(["result_a", "result_b", "final_result"])
            .with_tags(["demo"]),
        stable,
    )?;

    catalog.register_with(
        TaskSpec::new("multi_language", "0.1.0", multi_language())?
            .with_description("Greeting translated into several languages at once")
            .produces(["translations"])
            .with_tags(["demo", "fan-out"]),
        stable,
    )?;

    catalog.register_with(
        TaskSpec::new("web_recommend", "0.1.0", web_recommend())?
            .with_description("Query expansion, per-query search, and score ranking")
            .with_input(Contract::new().field("query", FieldType::String))
            .with_output(Contract::new().field("scored_results", FieldType::Array))
            .with_tags(["demo", "fan-out", "search"]),
        stable,
    )?;

    Ok(())
}

/// `x = 5` ends with `result_a = 15`, `result_b = 10`, `final_result = 25`.
pub fn simple_pipeline() -> Step {
    let add_ten = Leaf::new("add_ten", |input: LeafInput| {
        let x = input.context.get_i64("x").unwrap_or(0);
        Ok(Some(json!(x + 10)))
    })
    .with_output("result_a");

    let multiply_two = Leaf::new("multiply_two", |input: LeafInput| {
        let x = input.context.get_i64("x").unwrap_or(0);
        Ok(Some(json!(x * 2)))
    })
    .with_output("result_b");

    let combine = Leaf::new("combine", |input: LeafInput| {
        let a = input.context.get_i64("result_a").unwrap_or(0);
        let b = input.context.get_i64("result_b").unwrap_or(0);
        Ok(Some(json!(a + b)))
    })
    .with_output("final_result");

    Sequence::new(vec![
        Concurrent::new(vec![add_ten.into(), multiply_two.into()])
            .named("transform")
            .into(),
        combine.into(),
    ])
    .named("simple")
    .into()
}

pub const LANGUAGES: [&str; 5] = ["en", "ko", "ja", "zh", "es"];

fn greeting(language: &str) -> &'static str {
    match language {
        "ko" => "안녕하세요, 세계!",
        "ja" => "こんにちは、世界!",
        "zh" => "你好，世界!",
        "es" => "¡Hola, Mundo!",
        _ => "Hello, World!",
    }
}

/// One greeting per language, accumulated into `translations`.
pub fn multi_language() -> Step {
    let translate = Leaf::new("translate", |input: LeafInput| {
        let language = input.require_arg("language")?.as_str().unwrap_or("en");
        Ok(Some(json!(greeting(language))))
    })
    .with_output("translations");

    let fanout = ByArgs::new(translate).with_param("language", LANGUAGES.map(Value::from));
    Sequence::new(vec![Concurrent::by_args(fanout).into()])
        .named("multi_language")
        .into()
}

fn expand_query(query: &str, language: &str) -> Vec<String> {
    if language == "en" {
        vec![query.to_string(), format!("{query} guide"), format!("best {query}")]
    } else {
        vec![format!("{query} (ko)"), format!("{query} 가이드"), format!("최고 {query}")]
    }
}

fn search_results(query: &str) -> Value {
    json!([
        {"title": format!("Result for '{query}'"), "url": format!("http://example.com/{query}"), "score": 0.9},
        {"title": format!("Guide to {query}"), "url": format!("http://example.com/guide-{query}"), "score": 0.8},
    ])
}

/// Flatten one level of nesting under `key` in place.
fn flatten_key(name: &str, key: &'static str) -> Leaf {
    Leaf::new(name, move |input: LeafInput| {
        let Some(Value::Array(items)) = input.context.get(key) else {
            return Ok(None);
        };
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Array(nested) => flat.extend(nested),
                other => flat.push(other),
            }
        }
        Ok(Some(Value::Array(flat)))
    })
    .with_output(key)
}

/// `query` -> expanded queries per language -> one search per query ->
/// deduplicated results sorted by score in `scored_results`.
pub fn web_recommend() -> Step {
    let expand = Leaf::new("expand_query", |input: LeafInput| {
        let query = input.context.get_string("query").unwrap_or_default();
        let language = input.arg_str("language").unwrap_or("en");
        Ok(Some(json!(expand_query(&query, language))))
    })
    .with_output("query_expansion");

    let search = Leaf::new_async("search", |input: LeafInput| async move {
        let query = input.arg_str("input").unwrap_or_default().to_string();
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Some(search_results(&query)))
    })
    .with_output("search_results")
    .with_retries(2);

    let score = Leaf::new("score", |input: LeafInput| {
        let results = match input.context.get("search_results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let mut seen = HashSet::new();
        let mut unique: Vec<Value> = results
            .into_iter()
            .filter(|r| {
                let url = r.get("url").and_then(Value::as_str).unwrap_or_default();
                seen.insert(url.to_string())
            })
            .collect();
        unique.sort_by(|a, b| {
            let score = |v: &Value| v.get("score").and_then(Value::as_f64).unwrap_or(0.0);
            score(b).total_cmp(&score(a))
        });
        Ok(Some(Value::Array(unique)))
    })
    .with_output("scored_results");

    let expansion = ByArgs::new(expand).with_param("language", [json!("en"), json!("ko")]);

    Sequence::new(vec![
        Concurrent::by_args(expansion).into(),
        flatten_key("flatten_queries", "query_expansion").into(),
        ByKeys::new(search, ["query_expansion"], "input")
            .with_max_concurrency(4)
            .into(),
        flatten_key("flatten_results", "search_results").into(),
        score.into(),
    ])
    .named("web_recommend")
    .into()
}

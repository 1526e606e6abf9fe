//! Fragment Rewriting
//!
//! Fragments reference their parameters as variables. Before execution the
//! runner prefixes a `WITH` clause that binds each parameter to a variable
//! of the same name, and for partitioned execution an `UNWIND` that turns
//! the partition list back into one row per element:
//!
//! ```text
//! with_params_and_iterator("RETURN x * f", ["f", "x"], "x")
//!   => "WITH $`f` AS `f` UNWIND $`x` AS `x` RETURN x * f"
//! ```

use crate::value::Params;
use serde_json::Value;

/// Backtick-quote an identifier, doubling embedded backticks.
pub fn quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Parameter reference for `name`.
pub fn param(name: &str) -> String {
    format!("${}", quote(name))
}

fn with_clause<'a>(keys: impl Iterator<Item = &'a str>) -> Option<String> {
    let bindings: Vec<String> = keys
        .map(|key| format!("{} AS {}", param(key), quote(key)))
        .collect();
    (!bindings.is_empty()).then(|| format!("WITH {} ", bindings.join(", ")))
}

/// Bind every parameter in `keys` to a variable of the same name.
pub fn with_param_mapping<'a>(fragment: &str, keys: impl IntoIterator<Item = &'a str>) -> String {
    match with_clause(keys.into_iter()) {
        Some(with) => format!("{with}{fragment}"),
        None => fragment.to_string(),
    }
}

/// Like [`with_param_mapping`], but `iterator` is unwound instead of bound.
pub fn with_params_and_iterator<'a>(
    fragment: &str,
    keys: impl IntoIterator<Item = &'a str>,
    iterator: &str,
) -> String {
    if iterator.is_empty() {
        return with_param_mapping(fragment, keys);
    }
    let with = with_clause(keys.into_iter().filter(|key| *key != iterator)).unwrap_or_default();
    format!(
        "{with}UNWIND {} AS {} {fragment}",
        param(iterator),
        quote(iterator)
    )
}

/// `params` with `key` bound to `partition`.
pub fn parallel_params(params: &Params, key: &str, partition: Vec<Value>) -> Params {
    let mut bound = params.clone();
    bound.insert(key.to_string(), Value::Array(partition));
    bound
}

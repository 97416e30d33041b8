use serde::de::DeserializeOwned;
use serde_json::Value;

/// A deserialization failure together with the JSON path it happened at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    /// Dotted path such as `.properties.a.type`, empty at the root.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at JSON path {} → {}", display_path(&self.path), self.message)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "." } else { path }
}

fn convert<E: std::fmt::Display>(err: serde_path_to_error::Error<E>) -> PathError {
    let path = match err.path().to_string().as_str() {
        "." => String::new(),
        p if p.starts_with('.') || p.starts_with('[') => p.to_string(),
        p => format!(".{p}"),
    };
    PathError { path, message: err.into_inner().to_string() }
}

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, PathError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(convert)
}

/// Same as `from_str_with_path`, for an already parsed document.
pub fn from_value_with_path<T: DeserializeOwned>(value: &Value) -> Result<T, PathError> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(convert)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Outer {
        inner: Inner,
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Inner {
        count: u32,
    }

    #[test]
    fn errors_carry_the_failing_path() {
        let err = from_str_with_path::<Outer>(r#"{"inner": {"count": "x"}}"#).unwrap_err();
        assert_eq!(err.path, ".inner.count");
        let err = from_value_with_path::<Outer>(&serde_json::json!({"inner": {}})).unwrap_err();
        assert!(err.message.contains("count"), "{err}");
    }
}

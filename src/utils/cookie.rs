use std::collections::HashMap;

/// Parsed `Cookie:` request header.
#[derive(Debug, Clone, Default)]
pub struct Cookies {
    jar: HashMap<String, String>,
}

impl Cookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `name1=value1; name2=value2`.
    pub fn parse(header_value: &str) -> Self {
        let mut cookies = Cookies::new();
        for pair in header_value.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.jar.insert(name.to_string(), value.to_string());
            }
        }
        cookies
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.jar.get(name)
    }
}

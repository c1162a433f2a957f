use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use crate::DataProvider;

/// Typed access to the settings namespace of a [`DataProvider`].
///
/// Values are read through on every call; the adapter is the single source
/// of truth and may be changed out from under the server at runtime.
#[derive(Clone)]
pub struct Settings {
    data: Arc<dyn DataProvider>,
}

impl Settings {
    pub fn new(data: Arc<dyn DataProvider>) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data.get_setting(key)
    }

    /// Reads and parses a setting, falling back to `default` when the key
    /// is absent or unparseable.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.data
            .get_setting(key)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(default)
    }

    pub fn set<T: Display>(&self, key: &str, value: T) {
        self.data.set_setting(key, Some(&value.to_string()));
    }

    pub fn clear(&self, key: &str) {
        self.data.delete_setting(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryDataProvider;

    #[test]
    fn parses_with_fallback() {
        let settings = Settings::new(Arc::new(MemoryDataProvider::new()));

        assert_eq!(settings.get_or("timeout", 10000_u64), 10000);

        settings.set("timeout", 2500);
        assert_eq!(settings.get_or("timeout", 10000_u64), 2500);

        settings.set("timeout", "junk");
        assert_eq!(settings.get_or("timeout", 10000_u64), 10000);
    }
}

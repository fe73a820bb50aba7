use std::fmt;

/// Storage keys of the sensitive record groups shipped with the application.
pub const DEFAULT_CATEGORIES: [&str; 5] = [
    "medications",
    "vitals",
    "journal",
    "care_team",
    "appointments",
];

/// One named record group subject to the encryption policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataCategory(String);

impl DataCategory {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Storage key the category is persisted under.
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed set of categories considered sensitive. Static configuration, not user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRegistry {
    categories: Vec<DataCategory>,
}

impl CategoryRegistry {
    /// Build a registry from storage keys; duplicates are collapsed, order is kept.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut categories: Vec<DataCategory> = Vec::new();
        for key in keys {
            let category = DataCategory::new(key);
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        Self { categories }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.categories.iter().any(|c| c.key() == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataCategory> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORIES)
    }
}

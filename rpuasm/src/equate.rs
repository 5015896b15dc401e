use indexmap::IndexMap;

/// Named text substitutions. The data is kept as written and re-evaluated
/// wherever the equate is used; both passes rebuild the table from
/// scratch, so definitions stay pass-invariant by construction.
#[derive(Debug, Clone, Default)]
pub struct Equates {
    map: IndexMap<String, String>,
}

impl Equates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: String, data: String) {
        self.map.insert(name, data);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

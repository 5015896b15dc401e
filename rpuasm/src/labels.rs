use indexmap::IndexMap;

/// Insertion-ordered label registry. Labels are created during pass 1
/// only and never mutated; the whole table is torn down in one step at
/// the end of the run.
#[derive(Debug, Clone, Default)]
pub struct Labels {
    labels: IndexMap<String, i32>,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: String, offset: i32) {
        self.labels.insert(name, offset);
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.labels.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.labels.iter().map(|(name, off)| (name.as_str(), *off))
    }
}

//! In-memory tables keyed by identity.

use std::collections::BTreeMap;

use repokit_core::{Key, Value};

/// Stored record: field name to value.
pub type Record = BTreeMap<String, Value>;

/// Rows of one entity type, ordered by identity.
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: BTreeMap<Key, Record>,
    /// Last identity handed out by the sequence.
    sequence: i64,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Record> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.rows.contains_key(key)
    }

    /// Insert a new record. Returns false if the identity is taken.
    pub fn insert(&mut self, key: Key, record: Record) -> bool {
        if self.rows.contains_key(&key) {
            return false;
        }
        if let Key::Int(id) = key {
            self.sequence = self.sequence.max(id);
        }
        self.rows.insert(key, record);
        true
    }

    /// Overwrite the given fields of an existing record.
    pub fn update(&mut self, key: &Key, values: impl IntoIterator<Item = (String, Value)>) -> bool {
        match self.rows.get_mut(key) {
            Some(record) => {
                record.extend(values);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &Key) -> bool {
        self.rows.remove(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Record)> {
        self.rows.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Key, &mut Record)> {
        self.rows.iter_mut()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Key, &Record) -> bool) {
        self.rows.retain(|k, r| keep(k, r));
    }

    /// Advance the sequence, skipping identities already stored.
    pub fn next_identity(&mut self) -> i64 {
        loop {
            self.sequence += 1;
            if !self.rows.contains_key(&Key::Int(self.sequence)) {
                return self.sequence;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> Record {
        let mut r = Record::new();
        r.insert("name".to_string(), Value::Text(name.to_string()));
        r
    }

    #[test]
    fn sequence_skips_seeded_identities() {
        let mut table = Table::new();
        assert!(table.insert(Key::Int(5), record("teamA")));
        assert_eq!(table.next_identity(), 6);
        assert_eq!(table.next_identity(), 7);
        assert!(!table.insert(Key::Int(5), record("dup")));
    }

    #[test]
    fn update_and_remove() {
        let mut table = Table::new();
        table.insert(Key::Int(1), record("teamA"));
        assert!(table.update(
            &Key::Int(1),
            [("name".to_string(), Value::Text("teamB".to_string()))]
        ));
        assert_eq!(
            table.get(&Key::Int(1)).unwrap()["name"],
            Value::Text("teamB".to_string())
        );
        assert!(!table.update(&Key::Int(2), []));
        assert!(table.remove(&Key::Int(1)));
        assert!(table.is_empty());
    }
}

//! In-memory storage engine.
//!
//! Same contract as the SQLite engine; used by tests and by callers that
//! only need a process-lifetime cache.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::model::{FormMeta, Record};
use crate::storage::backend::{StoreBackend, WriteBatch};

#[derive(Debug, Default)]
struct FormTables {
    records: BTreeMap<String, Record>,
    meta: Option<FormMeta>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    forms: Mutex<BTreeMap<String, FormTables>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn forms(&self) -> MutexGuard<'_, BTreeMap<String, FormTables>> {
        self.forms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StoreBackend for MemoryBackend {
    async fn load_records(&self, form_id: &str) -> Result<Vec<Record>> {
        Ok(self
            .forms()
            .get(form_id)
            .map(|t| t.records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_record(&self, form_id: &str, entry_id: &str) -> Result<Option<Record>> {
        Ok(self
            .forms()
            .get(form_id)
            .and_then(|t| t.records.get(entry_id).cloned()))
    }

    async fn record_at(&self, form_id: &str, ordinal: usize) -> Result<Option<Record>> {
        Ok(self
            .forms()
            .get(form_id)
            .and_then(|t| t.records.values().nth(ordinal).cloned()))
    }

    async fn load_meta(&self, form_id: &str) -> Result<Option<FormMeta>> {
        Ok(self.forms().get(form_id).and_then(|t| t.meta.clone()))
    }

    async fn form_ids(&self) -> Result<Vec<String>> {
        Ok(self.forms().keys().cloned().collect())
    }

    async fn commit(&self, form_id: &str, batch: WriteBatch) -> Result<()> {
        let mut forms = self.forms();
        let tables = forms.entry(form_id.to_string()).or_default();

        if batch.clear {
            tables.records.retain(|_, stored| batch.protects(stored));
        }
        for entry_id in &batch.deletes {
            if tables
                .records
                .get(entry_id)
                .is_some_and(|stored| !batch.protects(stored))
            {
                tables.records.remove(entry_id);
            }
        }
        for record in &batch.puts {
            if tables
                .records
                .get(&record.entry_id)
                .is_some_and(|stored| batch.protects(stored))
            {
                continue;
            }
            tables.records.insert(record.entry_id.clone(), record.clone());
        }
        if let Some(update) = batch.meta {
            tables.meta = Some(update.apply(form_id, tables.meta.take()));
        }
        Ok(())
    }
}

// Typed access to the document store using the canonical collection paths.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{
    ActivityKind, AttendanceRecord, Budget, Employee, Insight, InventoryItem, Pond, PondActivity,
    Project, Record, Transaction,
};
use crate::paths::{self, DocPath, FarmScope, PathError};
use crate::store::{generate_key, DocumentStore};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    #[error("no document at {path}")]
    NotFound { path: DocPath },

    #[error("document at {path} does not match the expected shape: {source}")]
    Malformed {
        path: DocPath,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Typed view over a [`DocumentStore`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<DocumentStore>,
}

impl Ledger {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Generic record helpers
    // ------------------------------------------------------------------

    /// Write `record` into `collection`, assigning a key when its id is empty.
    fn insert<T>(&self, collection: &DocPath, mut record: T) -> LedgerResult<T>
    where
        T: Record + Serialize,
    {
        if record.id().is_empty() {
            record.set_id(generate_key());
        }
        let path = collection.child(record.id())?;
        self.store.set(&path, &to_value(&record)?)?;
        Ok(record)
    }

    /// Replace an existing record. Fails with `NotFound` if absent.
    fn replace<T>(&self, collection: &DocPath, id: &str, mut record: T) -> LedgerResult<T>
    where
        T: Record + Serialize,
    {
        let path = collection.child(id)?;
        if self.store.get(&path)?.is_none() {
            return Err(LedgerError::NotFound { path });
        }
        record.set_id(id.to_string());
        self.store.set(&path, &to_value(&record)?)?;
        Ok(record)
    }

    fn fetch<T>(&self, collection: &DocPath, id: &str) -> LedgerResult<Option<T>>
    where
        T: Record + DeserializeOwned,
    {
        let path = collection.child(id)?;
        match self.store.get(&path)? {
            Some(value) => {
                let mut record: T = serde_json::from_value(value)
                    .map_err(|source| LedgerError::Malformed { path, source })?;
                record.set_id(id.to_string());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records in `collection`. Documents that do not deserialize are
    /// skipped with a warning.
    fn list<T>(&self, collection: &DocPath) -> LedgerResult<Vec<T>>
    where
        T: Record + DeserializeOwned,
    {
        let docs = self.store.children(collection)?;
        let mut records = Vec::with_capacity(docs.len());
        for (key, value) in docs {
            match serde_json::from_value::<T>(value) {
                Ok(mut record) => {
                    record.set_id(key);
                    records.push(record);
                }
                Err(e) => warn!("skipping malformed record {collection}/{key}: {e}"),
            }
        }
        Ok(records)
    }

    fn delete(&self, collection: &DocPath, id: &str) -> LedgerResult<bool> {
        let path = collection.child(id)?;
        Ok(self.store.remove(&path)? > 0)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn add_transaction(&self, tx: Transaction) -> LedgerResult<Transaction> {
        let tx = self.insert(&paths::collection(paths::TRANSACTIONS), tx)?;
        info!(id = %tx.id, amount = tx.amount, kind = %tx.kind, "transaction added");
        Ok(tx)
    }

    pub fn replace_transaction(&self, id: &str, tx: Transaction) -> LedgerResult<Transaction> {
        self.replace(&paths::collection(paths::TRANSACTIONS), id, tx)
    }

    pub fn get_transaction(&self, id: &str) -> LedgerResult<Option<Transaction>> {
        self.fetch(&paths::collection(paths::TRANSACTIONS), id)
    }

    /// All transactions, newest date first.
    pub fn list_transactions(&self) -> LedgerResult<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self.list(&paths::collection(paths::TRANSACTIONS))?;
        txs.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
        Ok(txs)
    }

    pub fn delete_transaction(&self, id: &str) -> LedgerResult<bool> {
        self.delete(&paths::collection(paths::TRANSACTIONS), id)
    }

    // ------------------------------------------------------------------
    // Budgets
    // ------------------------------------------------------------------

    pub fn add_budget(&self, budget: Budget) -> LedgerResult<Budget> {
        self.insert(&paths::collection(paths::BUDGETS), budget)
    }

    pub fn replace_budget(&self, id: &str, budget: Budget) -> LedgerResult<Budget> {
        self.replace(&paths::collection(paths::BUDGETS), id, budget)
    }

    pub fn get_budget(&self, id: &str) -> LedgerResult<Option<Budget>> {
        self.fetch(&paths::collection(paths::BUDGETS), id)
    }

    pub fn list_budgets(&self) -> LedgerResult<Vec<Budget>> {
        self.list(&paths::collection(paths::BUDGETS))
    }

    pub fn delete_budget(&self, id: &str) -> LedgerResult<bool> {
        self.delete(&paths::collection(paths::BUDGETS), id)
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub fn add_project(&self, project: Project) -> LedgerResult<Project> {
        self.insert(&paths::collection(paths::PROJECTS), project)
    }

    pub fn replace_project(&self, id: &str, project: Project) -> LedgerResult<Project> {
        self.replace(&paths::collection(paths::PROJECTS), id, project)
    }

    pub fn get_project(&self, id: &str) -> LedgerResult<Option<Project>> {
        self.fetch(&paths::collection(paths::PROJECTS), id)
    }

    pub fn list_projects(&self) -> LedgerResult<Vec<Project>> {
        self.list(&paths::collection(paths::PROJECTS))
    }

    /// Case-insensitive lookup by display name.
    pub fn find_project_by_name(&self, name: &str) -> LedgerResult<Option<Project>> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .list_projects()?
            .into_iter()
            .find(|p| p.name.trim().to_lowercase() == wanted))
    }

    /// Delete a project. Its transactions and budgets are left untouched.
    pub fn delete_project(&self, id: &str) -> LedgerResult<bool> {
        self.delete(&paths::collection(paths::PROJECTS), id)
    }

    // ------------------------------------------------------------------
    // Employees and attendance
    // ------------------------------------------------------------------

    pub fn add_employee(&self, employee: Employee) -> LedgerResult<Employee> {
        self.insert(&paths::collection(paths::EMPLOYEES), employee)
    }

    pub fn replace_employee(&self, id: &str, employee: Employee) -> LedgerResult<Employee> {
        self.replace(&paths::collection(paths::EMPLOYEES), id, employee)
    }

    pub fn get_employee(&self, id: &str) -> LedgerResult<Option<Employee>> {
        self.fetch(&paths::collection(paths::EMPLOYEES), id)
    }

    pub fn list_employees(&self) -> LedgerResult<Vec<Employee>> {
        self.list(&paths::collection(paths::EMPLOYEES))
    }

    pub fn delete_employee(&self, id: &str) -> LedgerResult<bool> {
        self.delete(&paths::collection(paths::EMPLOYEES), id)
    }

    fn attendance_day(date: NaiveDate) -> LedgerResult<DocPath> {
        Ok(paths::collection(paths::ATTENDANCE).child(&date.format("%Y-%m-%d").to_string())?)
    }

    /// Write (or overwrite) one employee's mark for one day.
    pub fn mark_attendance(&self, record: &AttendanceRecord) -> LedgerResult<()> {
        let path = Self::attendance_day(record.date)?.child(&record.employee_id)?;
        self.store.set(&path, &to_value(record)?)?;
        info!(
            employee = %record.employee_id,
            date = %record.date,
            status = record.status.as_str(),
            "attendance marked"
        );
        Ok(())
    }

    pub fn attendance_on(&self, date: NaiveDate) -> LedgerResult<Vec<AttendanceRecord>> {
        let day = Self::attendance_day(date)?;
        let docs = self.store.children(&day)?;
        Ok(docs
            .into_iter()
            .filter_map(|(key, value)| parse_attendance(&day, &key, value))
            .collect())
    }

    /// Marks for every day in `from..=to`, ordered by date.
    pub fn attendance_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<Vec<AttendanceRecord>> {
        let root = paths::collection(paths::ATTENDANCE);
        let mut records: Vec<AttendanceRecord> = self
            .store
            .descendants(&root)?
            .into_iter()
            .filter_map(|(path, value)| {
                let parent = path.parent()?;
                let key = path.key().to_string();
                parse_attendance(&parent, &key, value)
            })
            .filter(|r| r.date >= from && r.date <= to)
            .collect();
        records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.employee_id.cmp(&b.employee_id)));
        Ok(records)
    }

    // ------------------------------------------------------------------
    // Farming
    // ------------------------------------------------------------------

    pub fn add_pond(&self, scope: &FarmScope, pond: Pond) -> LedgerResult<Pond> {
        self.insert(&scope.ponds(), pond)
    }

    pub fn get_pond(&self, scope: &FarmScope, id: &str) -> LedgerResult<Option<Pond>> {
        self.fetch(&scope.ponds(), id)
    }

    pub fn list_ponds(&self, scope: &FarmScope) -> LedgerResult<Vec<Pond>> {
        self.list(&scope.ponds())
    }

    pub fn add_inventory_item(&self, scope: &FarmScope, item: InventoryItem) -> LedgerResult<InventoryItem> {
        self.insert(&scope.inventory(), item)
    }

    pub fn list_inventory(&self, scope: &FarmScope) -> LedgerResult<Vec<InventoryItem>> {
        self.list(&scope.inventory())
    }

    /// Record a pond activity. A feeding linked to an inventory item draws
    /// the fed quantity down from that item's stock; the activity and the
    /// draw-down are written in one store transaction.
    pub fn add_activity(&self, scope: &FarmScope, mut activity: PondActivity) -> LedgerResult<PondActivity> {
        if activity.id().is_empty() {
            activity.set_id(generate_key());
        }
        let path = scope.activities().child(activity.id())?;
        let doc = to_value(&activity)?;

        self.store.transact(|batch| -> LedgerResult<PondActivity> {
            batch.set(&path, &doc)?;

            if let (ActivityKind::Feeding, Some(item_id), Some(fed)) =
                (activity.kind, activity.inventory_item_id.as_deref(), activity.quantity)
            {
                let item_path = scope.inventory().child(item_id)?;
                match batch.get(&item_path)? {
                    Some(value) => {
                        let item: InventoryItem = serde_json::from_value(value).map_err(|source| {
                            LedgerError::Malformed {
                                path: item_path.clone(),
                                source,
                            }
                        })?;
                        let mut fields = Map::new();
                        fields.insert("quantity".into(), Value::from(item.quantity - fed));
                        batch.update(&item_path, &fields)?;
                    }
                    None => warn!(item_id, "feeding references unknown inventory item"),
                }
            }

            Ok(activity)
        })
    }

    /// Activities in date order, optionally for a single pond.
    pub fn list_activities(
        &self,
        scope: &FarmScope,
        pond_id: Option<&str>,
    ) -> LedgerResult<Vec<PondActivity>> {
        let mut activities: Vec<PondActivity> = self.list(&scope.activities())?;
        if let Some(pond_id) = pond_id {
            activities.retain(|a| a.pond_id == pond_id);
        }
        activities.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(activities)
    }

    // ------------------------------------------------------------------
    // Insights
    // ------------------------------------------------------------------

    pub fn put_insight(&self, insight: Insight) -> LedgerResult<Insight> {
        self.insert(&paths::collection(paths::INSIGHTS), insight)
    }

    pub fn get_insight(&self, id: &str) -> LedgerResult<Option<Insight>> {
        self.fetch(&paths::collection(paths::INSIGHTS), id)
    }
}

fn to_value<T: Serialize>(record: &T) -> LedgerResult<Value> {
    serde_json::to_value(record)
        .map_err(|e| LedgerError::Store(anyhow::Error::new(e).context("failed to serialize record")))
}

fn parse_attendance(day: &DocPath, key: &str, value: Value) -> Option<AttendanceRecord> {
    match serde_json::from_value::<AttendanceRecord>(value) {
        Ok(mut record) => {
            record.employee_id = key.to_string();
            Some(record)
        }
        Err(e) => {
            warn!("skipping malformed attendance {day}/{key}: {e}");
            None
        }
    }
}

//! Active-record style persistence for plain model types
//!
//! A model type declares its name (and optionally its table and key column)
//! through [`Model`]; a [`Record`] holds the pending field values of one row
//! and knows whether saving it inserts a new row or updates an existing one.
//!
//! ```no_run
//! use potato::{Model, Session};
//!
//! struct Car;
//!
//! impl Model for Car {
//!     const NAME: &'static str = "Car";
//! }
//!
//! # fn main() -> potato::Result<()> {
//! let mut session = Session::from_env()?;
//!
//! let mut car = Car::new_record();
//! car.set("name", "Bentley").set("year", 2015);
//! car.save(&mut session)?;
//!
//! let mut car = Car::find(&mut session, 5)?;
//! car.set("name", "Beetle");
//! car.save(&mut session)?;
//! # Ok(())
//! # }
//! ```

pub mod sql;

use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

use crate::db::{Error, Result, Row, Session, Value};
use sql::Statement;

/// Table mapping for a concrete model type
pub trait Model: Sized {
    /// Short type name, used to derive the table name
    const NAME: &'static str;

    /// Table name override
    const TABLE: Option<&'static str> = None;

    /// Unique key column override
    const UNIQUE_KEY: Option<&'static str> = None;

    /// The configured table, or the lower-cased name with an `s` appended
    /// (`Car` is stored in `cars`, `Company` in `companys`).
    fn table_name() -> Cow<'static, str> {
        match Self::TABLE {
            Some(table) => Cow::Borrowed(table),
            None => Cow::Owned(format!("{}s", Self::NAME.to_lowercase())),
        }
    }

    fn unique_key_name() -> &'static str {
        Self::UNIQUE_KEY.unwrap_or("id")
    }

    /// An empty record that will be inserted on save
    fn new_record() -> Record<Self> {
        Record::new()
    }

    /// Look a row up by its unique key.
    ///
    /// The returned record is in update mode for that key. Its fields start
    /// out empty, so a later save only writes what was set on it; the fetched
    /// row is available through [`Record::loaded`].
    fn find(session: &mut Session, key: impl Into<Value>) -> Result<Record<Self>> {
        let key = key.into();
        let row = find_key::<Self>(session, &key)?;
        Ok(Record::existing(key, row))
    }

    /// First row matching a unique key value or an equality filter over
    /// several columns.
    fn find_by(session: &mut Session, criteria: impl Into<Criteria>) -> Result<Row> {
        match criteria.into() {
            Criteria::Key(key) => find_key::<Self>(session, &key),
            Criteria::Fields(fields) => {
                let table = Self::table_name();
                let stmt = Statement::select_where(session.database_type(), &table, &fields)?;
                first_match::<Self>(session, stmt, &fields)
            }
        }
    }

    /// Every row of the table; an empty table gives an empty list.
    fn get_all(session: &mut Session) -> Result<Vec<Row>> {
        let stmt = Statement::select_all(session.database_type(), &Self::table_name())?;
        tracing::debug!(table = %Self::table_name(), "loading all rows");
        session.query(&stmt.sql, &stmt.params)
    }

    /// Delete the row with this unique key, reporting whether one was removed.
    fn destroy(session: &mut Session, key: impl Into<Value>) -> Result<bool> {
        let stmt = Statement::delete(
            session.database_type(),
            &Self::table_name(),
            Self::unique_key_name(),
            &key.into(),
        )?;
        tracing::debug!(statement = %stmt.inline(), "deleting record");
        Ok(session.execute(&stmt.sql, &stmt.params)? > 0)
    }
}

fn find_key<M: Model>(session: &mut Session, key: &Value) -> Result<Row> {
    let key_column = M::unique_key_name();
    let table = M::table_name();
    let stmt = Statement::select_by_key(session.database_type(), &table, key_column, key)?;
    let criteria: Row = [(key_column, key.clone())].into_iter().collect();
    first_match::<M>(session, stmt, &criteria)
}

/// First row returned by `stmt`; `criteria` only names the lookup in errors.
fn first_match<M: Model>(session: &mut Session, stmt: Statement, criteria: &Row) -> Result<Row> {
    tracing::debug!(statement = %stmt.inline(), "looking up record");

    session
        .query(&stmt.sql, &stmt.params)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound {
            table: M::table_name().into_owned(),
            criteria: sql::describe(criteria),
        })
}

/// What to look a row up by
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// Unique key value
    Key(Value),
    /// Column equality filters, all of which must hold
    Fields(Row),
}

impl From<Value> for Criteria {
    fn from(key: Value) -> Self {
        Criteria::Key(key)
    }
}

impl From<i64> for Criteria {
    fn from(key: i64) -> Self {
        Criteria::Key(key.into())
    }
}

impl From<i32> for Criteria {
    fn from(key: i32) -> Self {
        Criteria::Key(key.into())
    }
}

impl From<&str> for Criteria {
    fn from(key: &str) -> Self {
        Criteria::Key(key.into())
    }
}

impl From<String> for Criteria {
    fn from(key: String) -> Self {
        Criteria::Key(key.into())
    }
}

impl From<Row> for Criteria {
    fn from(fields: Row) -> Self {
        Criteria::Fields(fields)
    }
}

/// Whether saving a record inserts or updates
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    New,
    Existing { key: Value },
}

/// Result of [`Record::save`]
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// A row was inserted; carries the key the database generated
    Inserted(Value),
    /// An existing row was updated; carries the number of affected rows
    Updated(u64),
}

impl SaveOutcome {
    pub fn inserted_key(&self) -> Option<&Value> {
        match self {
            SaveOutcome::Inserted(key) => Some(key),
            SaveOutcome::Updated(_) => None,
        }
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            SaveOutcome::Inserted(_) => None,
            SaveOutcome::Updated(count) => Some(*count),
        }
    }
}

/// Pending field values for one row of `M`'s table
pub struct Record<M: Model> {
    fields: Row,
    state: RecordState,
    loaded: Option<Row>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Record<M> {
    pub fn new() -> Self {
        Self {
            fields: Row::new(),
            state: RecordState::New,
            loaded: None,
            _model: PhantomData,
        }
    }

    fn existing(key: Value, loaded: Row) -> Self {
        Self {
            fields: Row::new(),
            state: RecordState::Existing { key },
            loaded: Some(loaded),
            _model: PhantomData,
        }
    }

    /// Assign a column value for the next save. Columns are not checked
    /// against the table.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }

    pub fn state(&self) -> &RecordState {
        &self.state
    }

    pub fn is_existing(&self) -> bool {
        matches!(self.state, RecordState::Existing { .. })
    }

    pub fn key(&self) -> Option<&Value> {
        match &self.state {
            RecordState::Existing { key } => Some(key),
            RecordState::New => None,
        }
    }

    /// The row fetched by [`Model::find`], if this record came from one
    pub fn loaded(&self) -> Option<&Row> {
        self.loaded.as_ref()
    }

    /// Insert or update the row, then clear the pending fields.
    pub fn save(&mut self, session: &mut Session) -> Result<SaveOutcome> {
        let table = M::table_name();
        let key_column = M::unique_key_name();
        let db = session.database_type();

        let outcome = match &self.state {
            RecordState::New => {
                let returning = db.uses_returning().then_some(key_column);
                let stmt = Statement::insert(db, &table, &self.fields, returning)?;
                tracing::debug!(statement = %stmt.inline(), "inserting record");
                SaveOutcome::Inserted(session.insert(&stmt.sql, &stmt.params)?)
            }
            RecordState::Existing { key } => {
                let stmt = Statement::update(db, &table, &self.fields, key_column, key)?;
                tracing::debug!(statement = %stmt.inline(), "updating record");
                SaveOutcome::Updated(session.execute(&stmt.sql, &stmt.params)?)
            }
        };

        self.fields.clear();
        Ok(outcome)
    }
}

impl<M: Model> Default for Record<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Clone for Record<M> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            state: self.state.clone(),
            loaded: self.loaded.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> fmt::Debug for Record<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &M::table_name())
            .field("state", &self.state)
            .field("fields", &self.fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Car;

    impl Model for Car {
        const NAME: &'static str = "Car";
    }

    struct Company;

    impl Model for Company {
        const NAME: &'static str = "Company";
    }

    struct User;

    impl Model for User {
        const NAME: &'static str = "User";
        const TABLE: Option<&'static str> = Some("user_table");
        const UNIQUE_KEY: Option<&'static str> = Some("user_id");
    }

    #[test]
    fn test_table_name_convention() {
        assert_eq!(Car::table_name(), "cars");
        assert_eq!(Company::table_name(), "companys");
        assert_eq!(User::table_name(), "user_table");
    }

    #[test]
    fn test_unique_key_name() {
        assert_eq!(Car::unique_key_name(), "id");
        assert_eq!(User::unique_key_name(), "user_id");
    }

    #[test]
    fn test_new_record_is_in_insert_mode() {
        let mut car = Car::new_record();
        assert!(!car.is_existing());
        assert_eq!(car.key(), None);

        car.set("name", "Bentley").set("year", 2015).set("name", "Beetle");
        assert_eq!(car.get("name"), Some(&Value::from("Beetle")));
        assert_eq!(car.fields().len(), 2);
    }

    #[test]
    fn test_records_do_not_share_fields() {
        let mut first = Car::new_record();
        let second = Car::new_record();
        first.set("name", "Ford");
        assert!(second.fields().is_empty());
    }

    #[test]
    fn test_criteria_conversions() {
        assert_eq!(Criteria::from(5), Criteria::Key(Value::Int(5)));
        assert_eq!(Criteria::from("abc"), Criteria::Key(Value::from("abc")));

        let fields: Row = [("name", "Ford")].into_iter().collect();
        assert_eq!(Criteria::from(fields.clone()), Criteria::Fields(fields));
    }

    #[test]
    fn test_save_outcome_accessors() {
        let inserted = SaveOutcome::Inserted(Value::Int(5));
        assert_eq!(inserted.inserted_key(), Some(&Value::Int(5)));
        assert_eq!(inserted.affected_rows(), None);
        assert_eq!(SaveOutcome::Updated(1).affected_rows(), Some(1));
    }
}

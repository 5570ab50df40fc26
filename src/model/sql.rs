//! SQL text for the record operations
//!
//! Identifiers are validated and written as-is, values always become bind
//! placeholders in the dialect of the target database.

use crate::db::{DatabaseType, Error, Result, Row, Value};

/// A statement ready to run: SQL text plus its bind parameters in order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Accept table and column names made of ASCII letters, digits and `_`,
/// optionally qualified with `.`, and not starting with a digit.
pub fn identifier(name: &str) -> Result<&str> {
    let valid = name.split('.').all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
    if valid {
        Ok(name)
    } else {
        Err(Error::Usage(format!("invalid identifier `{}`", name)))
    }
}

/// Human readable form of an equality filter, e.g. `name = 'Ford' AND year = 1967`
pub fn describe(criteria: &Row) -> String {
    criteria
        .iter()
        .map(|(column, value)| match value {
            Value::Null => format!("{} IS NULL", column),
            value => format!("{} = {}", column, value.to_literal()),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

struct Builder {
    db: DatabaseType,
    sql: String,
    params: Vec<Value>,
}

impl Builder {
    fn new(db: DatabaseType, sql: impl Into<String>) -> Self {
        Self {
            db,
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    fn bind(&mut self, value: &Value) -> &mut Self {
        self.params.push(value.clone());
        let placeholder = self.db.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    fn where_clause(&mut self, criteria: &Row) -> Result<&mut Self> {
        self.push(" WHERE ");
        for (idx, (column, value)) in criteria.iter().enumerate() {
            if idx > 0 {
                self.push(" AND ");
            }
            self.push(identifier(column)?);
            if value.is_null() {
                self.push(" IS NULL");
            } else {
                self.push(" = ").bind(value);
            }
        }
        Ok(self)
    }

    /// `WHERE key = ?`. A row cannot be addressed by a NULL key.
    fn key_clause(&mut self, key_column: &str, key: &Value) -> Result<&mut Self> {
        if key.is_null() {
            return Err(Error::Usage(format!(
                "unique key `{}` cannot be NULL",
                key_column
            )));
        }
        self.push(" WHERE ")
            .push(identifier(key_column)?)
            .push(" = ")
            .bind(key);
        Ok(self)
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

impl Statement {
    /// `INSERT INTO t (a, b) VALUES (?, ?)`, with `RETURNING key` when asked
    pub fn insert(
        db: DatabaseType,
        table: &str,
        fields: &Row,
        returning: Option<&str>,
    ) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::Usage(format!("no fields to insert into `{}`", table)));
        }

        let columns = fields
            .columns()
            .map(identifier)
            .collect::<Result<Vec<_>>>()?;

        let mut builder = Builder::new(db, "INSERT INTO ");
        builder
            .push(identifier(table)?)
            .push(" (")
            .push(&columns.join(", "))
            .push(") VALUES (");
        for (idx, value) in fields.values().enumerate() {
            if idx > 0 {
                builder.push(", ");
            }
            builder.bind(value);
        }
        builder.push(")");

        if let Some(key) = returning {
            builder.push(" RETURNING ").push(identifier(key)?);
        }
        Ok(builder.finish())
    }

    /// `UPDATE t SET a = ?, b = ? WHERE key = ?`
    pub fn update(
        db: DatabaseType,
        table: &str,
        fields: &Row,
        key_column: &str,
        key: &Value,
    ) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::Usage(format!("no fields to update in `{}`", table)));
        }

        let mut builder = Builder::new(db, "UPDATE ");
        builder.push(identifier(table)?).push(" SET ");
        for (idx, (column, value)) in fields.iter().enumerate() {
            if idx > 0 {
                builder.push(", ");
            }
            builder.push(identifier(column)?).push(" = ").bind(value);
        }
        builder.key_clause(key_column, key)?;
        Ok(builder.finish())
    }

    /// `SELECT * FROM t`
    pub fn select_all(db: DatabaseType, table: &str) -> Result<Self> {
        let mut builder = Builder::new(db, "SELECT * FROM ");
        builder.push(identifier(table)?);
        Ok(builder.finish())
    }

    /// `SELECT * FROM t WHERE a = ? AND b = ?`
    pub fn select_where(db: DatabaseType, table: &str, criteria: &Row) -> Result<Self> {
        if criteria.is_empty() {
            return Err(Error::Usage(format!(
                "empty criteria for lookup in `{}`",
                table
            )));
        }

        let mut builder = Builder::new(db, "SELECT * FROM ");
        builder.push(identifier(table)?).where_clause(criteria)?;
        Ok(builder.finish())
    }

    /// `SELECT * FROM t WHERE key = ?`
    pub fn select_by_key(
        db: DatabaseType,
        table: &str,
        key_column: &str,
        key: &Value,
    ) -> Result<Self> {
        let mut builder = Builder::new(db, "SELECT * FROM ");
        builder.push(identifier(table)?).key_clause(key_column, key)?;
        Ok(builder.finish())
    }

    /// `DELETE FROM t WHERE key = ?`
    pub fn delete(db: DatabaseType, table: &str, key_column: &str, key: &Value) -> Result<Self> {
        let mut builder = Builder::new(db, "DELETE FROM ");
        builder.push(identifier(table)?).key_clause(key_column, key)?;
        Ok(builder.finish())
    }

    /// The SQL with each placeholder replaced by its literal rendering.
    /// Only meant for logs: literals are not escaped.
    pub fn inline(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut next = 0;
        let mut chars = self.sql.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '?' => {
                    out.push_str(&self.literal(next));
                    next += 1;
                }
                '$' if chars.peek().is_some_and(|d| d.is_ascii_digit()) => {
                    let mut digits = String::new();
                    while let Some(d) = chars.next_if(|d| d.is_ascii_digit()) {
                        digits.push(d);
                    }
                    let index = digits.parse::<usize>().unwrap_or(0);
                    out.push_str(&self.literal(index.wrapping_sub(1)));
                }
                _ => out.push(c),
            }
        }
        out
    }

    fn literal(&self, index: usize) -> String {
        self.params
            .get(index)
            .map_or_else(|| "?".to_string(), Value::to_literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bentley() -> Row {
        let mut row = Row::new();
        row.insert("name", "Bentley");
        row.insert("model", "Mulsanne Range");
        row.insert("year", 2015);
        row
    }

    #[test]
    fn test_insert_sqlite() {
        let stmt = Statement::insert(DatabaseType::SQLite, "cars", &bentley(), None).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO cars (name, model, year) VALUES (?, ?, ?)"
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::from("Bentley"),
                Value::from("Mulsanne Range"),
                Value::Int(2015)
            ]
        );
        assert_eq!(
            stmt.inline(),
            "INSERT INTO cars (name, model, year) VALUES ('Bentley', 'Mulsanne Range', 2015)"
        );
    }

    #[test]
    fn test_insert_postgres_returns_key() {
        let stmt =
            Statement::insert(DatabaseType::PostgreSQL, "cars", &bentley(), Some("id")).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO cars (name, model, year) VALUES ($1, $2, $3) RETURNING id"
        );
    }

    #[test]
    fn test_update() {
        let mut fields = Row::new();
        fields.insert("name", "Beetle");
        fields.insert("year", 1938);

        let stmt = Statement::update(
            DatabaseType::PostgreSQL,
            "cars",
            &fields,
            "id",
            &Value::Int(5),
        )
        .unwrap();
        assert_eq!(stmt.sql, "UPDATE cars SET name = $1, year = $2 WHERE id = $3");
        assert_eq!(
            stmt.inline(),
            "UPDATE cars SET name = 'Beetle', year = 1938 WHERE id = 5"
        );
    }

    #[test]
    fn test_select_where_keeps_criteria_order() {
        let mut criteria = Row::new();
        criteria.insert("year", 2016);
        criteria.insert("name", "Nissan");
        criteria.insert("colour", Value::Null);

        let stmt = Statement::select_where(DatabaseType::MySQL, "cars", &criteria).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM cars WHERE year = ? AND name = ? AND colour IS NULL"
        );
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(
            describe(&criteria),
            "year = 2016 AND name = 'Nissan' AND colour IS NULL"
        );
    }

    #[test]
    fn test_select_all_and_delete() {
        let stmt = Statement::select_all(DatabaseType::SQLite, "user_table").unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM user_table");
        assert!(stmt.params.is_empty());

        let stmt =
            Statement::delete(DatabaseType::SQLite, "user_table", "user_id", &Value::Int(9))
                .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM user_table WHERE user_id = ?");
        assert_eq!(stmt.inline(), "DELETE FROM user_table WHERE user_id = 9");
    }

    #[test]
    fn test_empty_fields_are_a_usage_error() {
        let empty = Row::new();
        assert!(matches!(
            Statement::insert(DatabaseType::SQLite, "cars", &empty, None),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            Statement::select_where(DatabaseType::SQLite, "cars", &empty),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_null_key_is_a_usage_error() {
        let mut fields = Row::new();
        fields.insert("name", "Beetle");

        assert!(matches!(
            Statement::update(DatabaseType::SQLite, "cars", &fields, "id", &Value::Null),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            Statement::select_by_key(DatabaseType::SQLite, "cars", "id", &Value::Null),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            Statement::delete(DatabaseType::SQLite, "cars", "id", &Value::Null),
            Err(Error::Usage(_))
        ));

        // a NULL filter on an ordinary column still matches
        let criteria: Row = [("colour", Value::Null)].into_iter().collect();
        assert!(Statement::select_where(DatabaseType::SQLite, "cars", &criteria).is_ok());
    }

    #[test]
    fn test_select_by_key() {
        let stmt =
            Statement::select_by_key(DatabaseType::PostgreSQL, "cars", "id", &Value::Int(3))
                .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM cars WHERE id = $1");
        assert_eq!(stmt.params, vec![Value::Int(3)]);
    }

    #[test]
    fn test_identifiers() {
        assert!(identifier("cars").is_ok());
        assert!(identifier("public.cars").is_ok());
        assert!(identifier("_private2").is_ok());
        assert!(identifier("").is_err());
        assert!(identifier("2cars").is_err());
        assert!(identifier("cars; DROP TABLE cars").is_err());
        assert!(identifier("na'me").is_err());

        let mut fields = Row::new();
        fields.insert("name) VALUES ('x'); --", "y");
        assert!(matches!(
            Statement::insert(DatabaseType::SQLite, "cars", &fields, None),
            Err(Error::Usage(_))
        ));
    }
}

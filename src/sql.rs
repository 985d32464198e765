//! Statements the uploader issues against the warehouse.
//!
//! Each [`Statement`] renders to warehouse SQL through `Display`; adapters for
//! a live connection execute the rendered text, while the in-memory warehouse
//! interprets the variants directly.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{config::DistStyle, types::ColumnType, views::ViewKind};

/// Quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a `schema.relation` name part by part. Unqualified names are quoted whole.
pub fn quote_qualified(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, relation)) => format!("{}.{}", quote_ident(schema), quote_ident(relation)),
        None => quote_ident(name),
    }
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Unquoted `schema.table`, the form catalog rows use.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Select,
    All,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privilege::Select => f.write_str("SELECT"),
            Privilege::All => f.write_str("ALL"),
        }
    }
}

/// Physical layout hints used when creating a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableLayout {
    pub diststyle: DistStyle,
    pub distkey: Option<String>,
    pub sortkey: Option<String>,
}

/// Object store credentials embedded in a COPY.
#[derive(Clone, PartialEq, Eq)]
pub struct CopyCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for CopyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// One row of the upload audit table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub table_name: String,
    pub upload_time: String,
    pub rows: usize,
    pub warehouse_user: String,
    pub os_user: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    DropTable {
        table: TableName,
        cascade: bool,
    },
    CreateTable {
        table: TableName,
        columns: Vec<(String, ColumnType)>,
        layout: TableLayout,
    },
    Truncate(TableName),
    AlterColumnType {
        table: TableName,
        column: String,
        column_type: ColumnType,
    },
    Copy {
        table: TableName,
        /// Target columns; `None` loads positionally.
        columns: Option<Vec<String>>,
        source: String,
        credentials: CopyCredentials,
    },
    Grant {
        privilege: Privilege,
        /// Quoted or unquoted `schema.relation`.
        object: String,
        grantees: Vec<String>,
    },
    SetSearchPath(String),
    CreateView {
        name: String,
        kind: ViewKind,
        body: String,
    },
    /// `ALTER TABLE` is the form the warehouse accepts for views of either kind.
    AlterOwner {
        name: String,
        owner: String,
    },
    RefreshMaterializedView(String),
    RecordUpload {
        records_table: String,
        record: UploadRecord,
    },
}

impl Statement {
    /// Rendered SQL with COPY credentials masked, for logs and dry runs.
    pub fn redacted(&self) -> String {
        match self {
            Statement::Copy { credentials, .. } => self
                .to_string()
                .replace(&credentials.secret_key, "<redacted>"),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::DropTable { table, cascade } => {
                write!(f, "DROP TABLE IF EXISTS {table}")?;
                if *cascade {
                    f.write_str(" CASCADE")?;
                }
                Ok(())
            }
            Statement::CreateTable {
                table,
                columns,
                layout,
            } => {
                let definitions = columns
                    .iter()
                    .map(|(name, column_type)| {
                        let mut definition = format!("{} {column_type}", quote_ident(name));
                        if layout.distkey.as_deref() == Some(name.as_str()) {
                            definition.push_str(" DISTKEY");
                        }
                        if layout.sortkey.as_deref() == Some(name.as_str()) {
                            definition.push_str(" SORTKEY");
                        }
                        definition
                    })
                    .join(", ");
                write!(
                    f,
                    "CREATE TABLE IF NOT EXISTS {table} ({definitions}) DISTSTYLE {}",
                    layout.diststyle
                )
            }
            Statement::Truncate(table) => write!(f, "TRUNCATE {table}"),
            Statement::AlterColumnType {
                table,
                column,
                column_type,
            } => write!(
                f,
                "ALTER TABLE {table} ALTER COLUMN {} TYPE {column_type}",
                quote_ident(column)
            ),
            Statement::Copy {
                table,
                columns,
                source,
                credentials,
            } => {
                write!(f, "COPY {table}")?;
                if let Some(columns) = columns {
                    write!(f, " ({})", columns.iter().map(|c| quote_ident(c)).join(", "))?;
                }
                write!(
                    f,
                    " FROM {} CREDENTIALS {} FORMAT AS CSV EMPTYASNULL BLANKSASNULL \
                     DATEFORMAT 'auto' TIMEFORMAT 'auto'",
                    quote_literal(source),
                    quote_literal(&format!(
                        "aws_access_key_id={};aws_secret_access_key={}",
                        credentials.access_key, credentials.secret_key
                    ))
                )
            }
            Statement::Grant {
                privilege,
                object,
                grantees,
            } => write!(
                f,
                "GRANT {privilege} ON {} TO {}",
                quote_qualified(object),
                grantees.join(", ")
            ),
            Statement::SetSearchPath(schema) => {
                write!(f, "SET search_path = {}", quote_literal(schema))
            }
            Statement::CreateView { name, kind, body } => {
                write!(f, "CREATE {kind} {} AS\n{body}", quote_qualified(name))
            }
            Statement::AlterOwner { name, owner } => write!(
                f,
                "ALTER TABLE {} OWNER TO {}",
                quote_qualified(name),
                quote_ident(owner)
            ),
            Statement::RefreshMaterializedView(name) => {
                write!(f, "REFRESH MATERIALIZED VIEW {}", quote_qualified(name))
            }
            Statement::RecordUpload {
                records_table,
                record,
            } => write!(
                f,
                "INSERT INTO {} (table_name, upload_time, rows, redshift_user, os_user) \
                 VALUES ({}, {}, {}, {}, {})",
                quote_qualified(records_table),
                quote_literal(&record.table_name),
                quote_literal(&record.upload_time),
                record.rows,
                quote_literal(&record.warehouse_user),
                quote_literal(&record.os_user)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;

    fn table() -> TableName {
        TableName::new("public", "orders")
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(table().to_string(), "\"public\".\"orders\"");
        assert_eq!(quote_ident("a \"b\""), "\"a \"\"b\"\"\"");
        assert_eq!(quote_qualified("s.v"), "\"s\".\"v\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn create_table_marks_keys_and_diststyle() {
        let statement = Statement::CreateTable {
            table: table(),
            columns: vec![
                ("id".into(), ColumnType::scalar(TypeKind::Integer)),
                ("name".into(), ColumnType::varchar(12)),
            ],
            layout: TableLayout {
                diststyle: DistStyle::Key,
                distkey: Some("id".into()),
                sortkey: Some("name".into()),
            },
        };
        assert_eq!(
            statement.to_string(),
            "CREATE TABLE IF NOT EXISTS \"public\".\"orders\" (\"id\" INTEGER DISTKEY, \
             \"name\" VARCHAR(12) SORTKEY) DISTSTYLE key"
        );
    }

    #[test]
    fn copy_redaction_hides_secret() {
        let statement = Statement::Copy {
            table: table(),
            columns: Some(vec!["id".into()]),
            source: "s3://bucket/public_orders_".into(),
            credentials: CopyCredentials {
                access_key: "AKIA".into(),
                secret_key: "s3cr3t".into(),
            },
        };
        assert!(statement.to_string().contains("s3cr3t"));
        let redacted = statement.redacted();
        assert!(!redacted.contains("s3cr3t"));
        assert!(redacted.starts_with("COPY \"public\".\"orders\" (\"id\") FROM 's3://bucket/"));
    }

    #[test]
    fn grant_and_view_statements_render() {
        let grant = Statement::Grant {
            privilege: Privilege::Select,
            object: "public.orders_view".into(),
            grantees: vec!["analyst".into(), "group bi".into()],
        };
        assert_eq!(
            grant.to_string(),
            "GRANT SELECT ON \"public\".\"orders_view\" TO analyst, group bi"
        );
        let create = Statement::CreateView {
            name: "public.orders_mv".into(),
            kind: ViewKind::MaterializedView,
            body: "SELECT 1".into(),
        };
        assert_eq!(
            create.to_string(),
            "CREATE MATERIALIZED VIEW \"public\".\"orders_mv\" AS\nSELECT 1"
        );
    }

    #[test]
    fn view_ownership_is_altered_through_alter_table() {
        let owner = Statement::AlterOwner {
            name: "public.orders_view".into(),
            owner: "etl".into(),
        };
        assert_eq!(
            owner.to_string(),
            "ALTER TABLE \"public\".\"orders_view\" OWNER TO \"etl\""
        );
    }
}

//! The handful of places where SQLite and PostgreSQL SQL differ.

/// SQL flavour of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded engine.
    Sqlite,
    /// Server engine.
    Postgres,
}

impl Dialect {
    /// Auto-increment primary key column type.
    #[must_use]
    pub const fn primary_key(self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// Column type for UTC instants.
    ///
    /// The embedded engine stores RFC 3339 text written by the application,
    /// which orders correctly under plain string comparison.
    #[must_use]
    pub const fn timestamp(self) -> &'static str {
        match self {
            Self::Sqlite => "TEXT",
            Self::Postgres => "TIMESTAMPTZ",
        }
    }

    /// Suffix that row-locks the rows a `SELECT` returns.
    ///
    /// Empty on the embedded engine, which takes a database-wide write lock
    /// instead (see [`Dialect::needs_write_lock_touch`]).
    #[must_use]
    pub const fn for_update(self) -> &'static str {
        match self {
            Self::Sqlite => "",
            Self::Postgres => " FOR UPDATE",
        }
    }

    /// Whether a transaction must write before it reads to hold the lock.
    #[must_use]
    pub const fn needs_write_lock_touch(self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Query counting columns named `$2` on table `$1`.
    #[must_use]
    pub const fn column_exists_sql(self) -> &'static str {
        match self {
            Self::Sqlite => "SELECT COUNT(*) FROM pragma_table_info($1) WHERE name = $2",
            Self::Postgres => {
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2"
            }
        }
    }

    /// Whether `CREATE UNIQUE INDEX ... WHERE` is honoured.
    #[must_use]
    pub const fn supports_partial_unique_index(self) -> bool {
        match self {
            Self::Sqlite | Self::Postgres => true,
        }
    }

    /// Expands the `{pk}` and `{ts}` placeholders of a DDL template.
    #[must_use]
    pub fn render(self, ddl: &str) -> String {
        ddl.replace("{pk}", self.primary_key())
            .replace("{ts}", self.timestamp())
    }
}

/// Binds a `sqlx` database to its dialect.
pub trait Backend: sqlx::Database {
    /// SQL flavour of this database.
    const DIALECT: Dialect;
}

impl Backend for sqlx::Sqlite {
    const DIALECT: Dialect = Dialect::Sqlite;
}

impl Backend for sqlx::Postgres {
    const DIALECT: Dialect = Dialect::Postgres;
}

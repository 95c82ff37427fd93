use std::ops::Deref;

use ladder_common::{Error, Result};
use rusqlite::Connection;

/// A database handle that can open a transaction.
///
/// `Conn` is the statement-executing view migrations and state stores work
/// against. While a transaction is open, that view is reached by
/// dereferencing the transaction, so everything executed through it belongs
/// to the transaction.
pub trait Database {
    type Conn: ?Sized;
    type Tx<'a>: Transaction + Deref<Target = Self::Conn>
    where
        Self: 'a;

    fn begin(&mut self) -> Result<Self::Tx<'_>>;
}

/// An open transaction. Consumed by exactly one of `commit` or `rollback`.
pub trait Transaction {
    fn commit(self) -> Result<()>;
    fn rollback(self) -> Result<()>;
}

impl Database for Connection {
    type Conn = Connection;
    type Tx<'a> = rusqlite::Transaction<'a>;

    fn begin(&mut self) -> Result<rusqlite::Transaction<'_>> {
        self.transaction()
            .map_err(|e| Error::Database(e.to_string()))
    }
}

impl Transaction for rusqlite::Transaction<'_> {
    fn commit(self) -> Result<()> {
        rusqlite::Transaction::commit(self)
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn rollback(self) -> Result<()> {
        rusqlite::Transaction::rollback(self)
            .map_err(|e| Error::Database(e.to_string()))
    }
}

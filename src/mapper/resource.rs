//! Transaction control forwarded to the underlying connection.
//!
//! SQLite has no prepared-transaction log, so `prepare` only checks that the
//! branch is the one in progress and `recover` never finds anything.

use tracing::{Level, event};

use super::Mapper;
use crate::core::{Result, StorageError};

/// The transactional capability of one connection.
pub trait TransactionalResource {
    fn start(&mut self, xid: &str) -> Result<()>;

    /// Ends the association of the branch with this resource.
    fn end(&mut self, xid: &str) -> Result<()>;

    fn prepare(&mut self, xid: &str) -> Result<()>;

    fn commit(&mut self, xid: &str) -> Result<()>;

    fn rollback(&mut self, xid: &str) -> Result<()>;

    /// Branches prepared but neither committed nor rolled back.
    fn recover(&mut self) -> Result<Vec<String>>;

    fn is_active(&self) -> bool;
}

impl Mapper {
    fn check_xid(&self, xid: &str) -> Result<()> {
        match &self.xid {
            Some(current) if current == xid => Ok(()),
            Some(current) => Err(StorageError::IllegalState(format!(
                "Transaction {} is not the active one ({})",
                xid, current
            ))),
            None => Err(StorageError::IllegalState(format!(
                "Transaction {} is not started",
                xid
            ))),
        }
    }

    fn run_control(&self, sql: &str) -> Result<()> {
        self.connection()
            .execute_batch(sql)
            .map_err(|e| StorageError::backend("Transaction control failed", sql, e))
    }
}

impl TransactionalResource for Mapper {
    fn start(&mut self, xid: &str) -> Result<()> {
        if let Some(current) = &self.xid {
            return Err(StorageError::IllegalState(format!(
                "Cannot start {}: transaction {} already active",
                xid, current
            )));
        }
        self.run_control("BEGIN")?;
        self.xid = Some(xid.to_string());
        event!(Level::DEBUG, xid = %xid, "transaction started");
        Ok(())
    }

    fn end(&mut self, xid: &str) -> Result<()> {
        self.check_xid(xid)
    }

    fn prepare(&mut self, xid: &str) -> Result<()> {
        self.check_xid(xid)
    }

    fn commit(&mut self, xid: &str) -> Result<()> {
        self.check_xid(xid)?;
        self.run_control("COMMIT")?;
        self.xid = None;
        event!(Level::DEBUG, xid = %xid, "transaction committed");
        Ok(())
    }

    fn rollback(&mut self, xid: &str) -> Result<()> {
        self.check_xid(xid)?;
        // the branch is over whatever the outcome
        self.xid = None;
        if self.connection().is_autocommit() {
            log::warn!("Rollback of {} with no transaction open on the connection", xid);
            return Ok(());
        }
        self.run_control("ROLLBACK")?;
        event!(Level::DEBUG, xid = %xid, "transaction rolled back");
        Ok(())
    }

    fn recover(&mut self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn is_active(&self) -> bool {
        self.xid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IdPolicy;
    use crate::mapper::tests::test_mapper;

    #[test]
    fn test_commit_and_rollback() {
        let mut mapper = test_mapper(IdPolicy::AppUuid);
        mapper.start("tx1").unwrap();
        assert!(mapper.is_active());
        mapper.set_root_id("repo", &"root-1".into()).unwrap();
        mapper.end("tx1").unwrap();
        mapper.prepare("tx1").unwrap();
        mapper.commit("tx1").unwrap();
        assert!(!mapper.is_active());

        mapper.start("tx2").unwrap();
        mapper.set_root_id("other", &"root-2".into()).unwrap();
        mapper.rollback("tx2").unwrap();

        assert!(mapper.get_root_id("repo").unwrap().is_some());
        assert!(mapper.get_root_id("other").unwrap().is_none());
        assert!(mapper.recover().unwrap().is_empty());
    }

    #[test]
    fn test_branch_mismatch() {
        let mut mapper = test_mapper(IdPolicy::AppUuid);
        assert!(matches!(mapper.commit("nope"), Err(StorageError::IllegalState(_))));
        mapper.start("tx1").unwrap();
        assert!(matches!(mapper.start("tx2"), Err(StorageError::IllegalState(_))));
        assert!(matches!(mapper.commit("tx2"), Err(StorageError::IllegalState(_))));
        mapper.rollback("tx1").unwrap();
    }
}

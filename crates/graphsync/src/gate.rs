//! FIFO-fair bound on simultaneous requests
//!
//! Only the network call holds a ticket; scanning and reconciliation never
//! wait on the gate.

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{Result, SyncError};

/// Counting gate that hands tickets to waiters in arrival order
pub struct Gate {
    tickets: Semaphore,
}

/// A held ticket; dropping it hands the ticket to the oldest waiter
#[derive(Debug)]
pub struct Ticket<'a> {
    _permit: SemaphorePermit<'a>,
}

impl Gate {
    pub fn new(tickets: usize) -> Self {
        Self {
            tickets: Semaphore::new(tickets.max(1)),
        }
    }

    /// Two tickets in parallel mode, one otherwise
    pub fn for_mode(parallel: bool) -> Self {
        Self::new(if parallel { 2 } else { 1 })
    }

    /// Wait for a ticket; a waiter dropped before its turn gives up its place
    pub async fn take_ticket(&self) -> Result<Ticket<'_>> {
        let permit = self
            .tickets
            .acquire()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        Ok(Ticket { _permit: permit })
    }

    /// Stop handing out tickets; current and future waiters get `Cancelled`
    pub fn close(&self) {
        self.tickets.close();
    }

    pub fn available(&self) -> usize {
        self.tickets.available_permits()
    }
}

//! Audit log entries.
//!
//! One row per privileged action. Entries are built in memory and appended
//! after the main write path has committed, so a slow audit insert never
//! holds a marketplace transaction open.

use punks_core::PunkId;

use crate::store::now_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    ListCreated,
    DepositConfirmed,
    SaleCompleted,
    PaymentFailed,
    ListingCancelled,
    RefundFailed,
    ReserveReturned,
    ReserveClaim,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::ListCreated => "LIST_CREATED",
            AuditAction::DepositConfirmed => "DEPOSIT_CONFIRMED",
            AuditAction::SaleCompleted => "SALE_COMPLETED",
            AuditAction::PaymentFailed => "PAYMENT_FAILED",
            AuditAction::ListingCancelled => "LISTING_CANCELLED",
            AuditAction::RefundFailed => "REFUND_FAILED",
            AuditAction::ReserveReturned => "RESERVE_RETURNED",
            AuditAction::ReserveClaim => "RESERVE_CLAIM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    Failed,
    Pending,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failed => "FAILED",
            AuditStatus::Pending => "PENDING",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: i64,
    pub action: AuditAction,
    pub punk_id: Option<PunkId>,
    pub seller: Option<String>,
    pub buyer: Option<String>,
    pub amount_sats: Option<u64>,
    pub txid: Option<String>,
    pub status: AuditStatus,
    pub error: Option<String>,
    pub details_json: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, status: AuditStatus) -> Self {
        Self {
            timestamp: now_ts(),
            action,
            punk_id: None,
            seller: None,
            buyer: None,
            amount_sats: None,
            txid: None,
            status,
            error: None,
            details_json: None,
        }
    }

    pub fn punk(mut self, punk_id: PunkId) -> Self {
        self.punk_id = Some(punk_id);
        self
    }

    pub fn seller(mut self, seller: impl Into<String>) -> Self {
        self.seller = Some(seller.into());
        self
    }

    pub fn buyer(mut self, buyer: impl Into<String>) -> Self {
        self.buyer = Some(buyer.into());
        self
    }

    pub fn amount(mut self, sats: u64) -> Self {
        self.amount_sats = Some(sats);
        self
    }

    pub fn txid(mut self, txid: impl Into<String>) -> Self {
        self.txid = Some(txid.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details_json = Some(details.to_string());
        self
    }
}

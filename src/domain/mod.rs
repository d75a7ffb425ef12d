//! Domain entities and invariants.
//!
//! Mirrors spec.md §3: Tier, User/Session, Purchase, Assessment,
//! VirtualAccount, Position, Trade, Violation/RuleCheck, FundedAccount,
//! FundedVirtualAccount, Withdrawal, and the cache-resident hot snapshot.
//! Children are keyed by parent id rather than carrying back-pointers --
//! the graph is a tree (Design Notes §9).

pub mod assessment;
pub mod funded;
pub mod position;
pub mod purchase;
pub mod rules;
pub mod snapshot;
pub mod tier;
pub mod trade;
pub mod user;
pub mod virtual_account;
pub mod withdrawal;

pub use assessment::{Assessment, AssessmentStatus};
pub use funded::{FundedAccount, FundedAccountStatus, FundedVirtualAccount};
pub use position::{Position, PositionStatus, Side};
pub use purchase::{Purchase, PurchaseStatus};
pub use rules::{RuleCheck, RuleName, RuleStatus, Violation};
pub use snapshot::{HotSnapshot, RuleValue, RulesSnapshot, SnapshotPosition};
pub use tier::Tier;
pub use trade::{Trade, TradeKind};
pub use user::{Session, User};
pub use virtual_account::VirtualAccount;
pub use withdrawal::{Withdrawal, WithdrawalStatus};

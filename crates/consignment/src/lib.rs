//! `cardflow-consignment` — consignor terms and payout computation.
//!
//! Pure domain: the terms value object, the payout-due formula, and the
//! pro-rata attribution rule for bulk sales. No storage, no IO.

pub mod consignor;
pub mod terms;

pub use consignor::{Consignor, ConsignorId};
pub use terms::{ConsignmentTerms, allocate_pro_rata};

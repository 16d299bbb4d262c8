use serde::{Deserialize, Serialize};

use cardflow_core::{AggregateId, DomainError, DomainResult, Entity};

use crate::ConsignmentTerms;

/// Consignor identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsignorId(pub AggregateId);

impl ConsignorId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ConsignorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A third party who supplies cards for sale under revenue-share terms.
///
/// The `default_terms` apply to newly arriving cards unless the batch row
/// carries a per-card override. Cards snapshot whichever terms applied at
/// arrival; editing the defaults here is never retroactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consignor {
    pub id: ConsignorId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub default_terms: ConsignmentTerms,
}

impl Consignor {
    pub fn new(
        id: ConsignorId,
        name: impl Into<String>,
        default_terms: ConsignmentTerms,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("consignor name cannot be empty"));
        }
        Ok(Self {
            id,
            name,
            email: None,
            phone: None,
            default_terms,
        })
    }
}

impl Entity for Consignor {
    type Id = ConsignorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_rejected() {
        let terms = ConsignmentTerms::new(80, 0, false, 14).unwrap();
        let err = Consignor::new(ConsignorId::new(AggregateId::new()), "  ", terms).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn construction_keeps_default_terms() {
        let terms = ConsignmentTerms::new(80, 25_00, true, 14).unwrap();
        let consignor =
            Consignor::new(ConsignorId::new(AggregateId::new()), "Vintage Vault", terms).unwrap();
        assert_eq!(consignor.default_terms, terms);
    }
}

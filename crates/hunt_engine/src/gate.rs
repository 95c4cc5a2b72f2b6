use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditKind, AuditLog};
use crate::clock::Clock;
use crate::error::RemoteError;
use crate::model::{Cents, OwnerId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntitlementStatus {
    pub active_subscription: bool,
    pub privileged: bool,
}

#[allow(async_fn_in_trait)]
pub trait EntitlementProvider {
    async fn entitlement_for(&self, owner: &OwnerId) -> Result<EntitlementStatus, RemoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentRequest {
    pub is_area_generation: bool,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Confirmed,
    Declined(String),
    Cancelled,
}

/// Payment flow. May suspend for as long as the user takes to complete it.
#[allow(async_fn_in_trait)]
pub trait PaymentProcessor {
    async fn request_payment(
        &self,
        owner: &OwnerId,
        request: PaymentRequest,
    ) -> Result<PaymentOutcome, RemoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantReason {
    Bypass,
    Subscription,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    Declined(String),
    Cancelled,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declined(reason) => write!(f, "declined ({reason})"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Granted(GrantReason),
    Denied(DenialReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("entitlement lookup failed: {0}")]
    Entitlement(#[source] RemoteError),
    #[error("payment flow failed: {0}")]
    Payment(#[source] RemoteError),
}

impl GateError {
    pub fn remote(&self) -> &RemoteError {
        match self {
            Self::Entitlement(error) | Self::Payment(error) => error,
        }
    }
}

/// Decides whether an owner may run a paid generation. Never touches area
/// state; it only answers granted or denied.
#[derive(Debug)]
pub struct PaymentGate<E, P> {
    entitlements: E,
    payments: P,
}

impl<E: EntitlementProvider, P: PaymentProcessor> PaymentGate<E, P> {
    pub fn new(entitlements: E, payments: P) -> Self {
        Self {
            entitlements,
            payments,
        }
    }

    pub fn entitlements(&self) -> &E {
        &self.entitlements
    }

    pub fn payments(&self) -> &P {
        &self.payments
    }

    pub async fn ensure_entitlement(
        &self,
        owner: &OwnerId,
        cost: Cents,
        audit: &AuditLog,
        clock: &dyn Clock,
    ) -> Result<GateDecision, GateError> {
        let status = self
            .entitlements
            .entitlement_for(owner)
            .await
            .map_err(GateError::Entitlement)?;

        if status.privileged {
            audit.record(
                owner,
                AuditKind::BypassUsed,
                format!("privileged role skipped payment of {cost}"),
                clock.now(),
            );
            info!(owner = %owner, cost = %cost, "payment_bypassed_privileged_role");
            return Ok(GateDecision::Granted(GrantReason::Bypass));
        }
        if status.active_subscription {
            info!(owner = %owner, "payment_covered_by_subscription");
            return Ok(GateDecision::Granted(GrantReason::Subscription));
        }

        audit.record(
            owner,
            AuditKind::PaymentRequired,
            format!("no entitlement, requesting payment of {cost}"),
            clock.now(),
        );
        let request = PaymentRequest {
            is_area_generation: true,
            amount: cost,
        };
        let outcome = self
            .payments
            .request_payment(owner, request)
            .await
            .map_err(GateError::Payment)?;

        match outcome {
            PaymentOutcome::Confirmed => {
                info!(owner = %owner, cost = %cost, "payment_confirmed");
                Ok(GateDecision::Granted(GrantReason::Paid))
            }
            PaymentOutcome::Declined(reason) => {
                warn!(owner = %owner, cost = %cost, reason = %reason, "payment_declined");
                Ok(GateDecision::Denied(DenialReason::Declined(reason)))
            }
            PaymentOutcome::Cancelled => {
                warn!(owner = %owner, cost = %cost, "payment_cancelled");
                Ok(GateDecision::Denied(DenialReason::Cancelled))
            }
        }
    }
}

//! Instance fan-out
//!
//! Turns the selected variants into the concrete checks of a run: one check
//! per account or region variant, one per enumerated instance otherwise.

use super::{Check, QuotaCheck, Scope};
use crate::session::Session;

/// A variant whose instances could not be enumerated
#[derive(Debug)]
pub struct EnumerationFailure {
    pub key: &'static str,
    pub description: &'static str,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct Expansion {
    pub checks: Vec<Check>,
    pub failures: Vec<EnumerationFailure>,
}

/// Instantiate every selected variant, in selection order
///
/// A failing enumeration is recorded and the remaining variants still expand.
pub async fn expand(session: &Session, variants: &[&'static dyn QuotaCheck]) -> Expansion {
    let mut expansion = Expansion::default();

    for &variant in variants {
        if variant.scope() != Scope::Instance {
            match Check::new(variant) {
                Ok(check) => expansion.checks.push(check),
                Err(error) => expansion.failures.push(EnumerationFailure {
                    key: variant.key(),
                    description: variant.description(),
                    error,
                }),
            }
            continue;
        }

        match variant.identifiers(session).await {
            Ok(ids) => {
                tracing::debug!("{}: {} instance(s)", variant.key(), ids.len());
                for id in ids {
                    match Check::for_instance(variant, id) {
                        Ok(check) => expansion.checks.push(check),
                        Err(error) => expansion.failures.push(EnumerationFailure {
                            key: variant.key(),
                            description: variant.description(),
                            error,
                        }),
                    }
                }
            },
            Err(error) => {
                tracing::warn!("Failed to enumerate instances for {}: {:#}", variant.key(), error);
                expansion.failures.push(EnumerationFailure {
                    key: variant.key(),
                    description: variant.description(),
                    error,
                });
            },
        }
    }

    expansion
}

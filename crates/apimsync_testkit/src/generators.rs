//! Property-based test generators using proptest.
//!
//! Generated identity fields never contain or border on the fingerprint
//! separator, so every generated identity can be fingerprinted. Names never
//! hold the certificate alias separator.

use apimsync_core::{ApiIdentity, DesiredApiDefinition, LifecycleState};
use proptest::prelude::*;

/// Strategy for generating API names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][A-Za-z0-9]{0,7}(_[A-Za-z0-9]{1,7})?").expect("Invalid regex")
}

/// Strategy for generating API versions.
pub fn version_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("v[0-9]{1,2}(\\.[0-9]{1,2}){0,2}").expect("Invalid regex")
}

/// Strategy for generating root contexts.
pub fn context_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("(/[a-z][a-z0-9-]{0,8}){1,3}").expect("Invalid regex")
}

/// Strategy for generating tenant domains.
pub fn tenant_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{2,10}\\.(com|org|io)").expect("Invalid regex")
}

/// Strategy for generating identities.
pub fn identity_strategy() -> impl Strategy<Value = ApiIdentity> {
    (name_strategy(), version_strategy(), context_strategy())
        .prop_map(|(name, version, context)| ApiIdentity::new(name, version, context))
}

/// Strategy for generating HTTP definitions.
pub fn definition_strategy() -> impl Strategy<Value = DesiredApiDefinition> {
    identity_strategy().prop_map(|identity| {
        DesiredApiDefinition::http(
            identity.name,
            identity.version,
            identity.context,
            "https://backend.internal",
        )
    })
}

/// Strategy for generating sets of definitions with distinct identities.
pub fn definitions_strategy(max: usize) -> impl Strategy<Value = Vec<DesiredApiDefinition>> {
    prop::collection::vec(definition_strategy(), 1..=max.max(1)).prop_map(|defs| {
        let mut seen = std::collections::HashSet::new();
        defs.into_iter()
            .filter(|def| seen.insert(def.identity()))
            .collect()
    })
}

/// Strategy for generating lifecycle states, including platform-specific ones.
pub fn lifecycle_state_strategy() -> impl Strategy<Value = LifecycleState> {
    prop_oneof![
        Just(LifecycleState::Created),
        Just(LifecycleState::Published),
        Just(LifecycleState::Other("DEPRECATED".into())),
        Just(LifecycleState::Other("BLOCKED".into())),
    ]
}

//! Property-based tests for artifact-key determinism

use proptest::prelude::*;
use recache::types::{ArtifactKey, Scope, SubjectId};

#[test]
fn test_key_determinism_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &("[a-zA-Z0-9_-]{1,32}", "[a-z_]{1,16}", "[a-z0-9]{1,16}"),
            |(subject_raw, scope_key, scope_value)| {
                let subject = SubjectId::new(&subject_raw);
                let scope = Scope::new().with(&scope_key, &scope_value);

                let key1 = ArtifactKey::derive(&subject, &scope);
                let key2 = ArtifactKey::derive(&subject, &scope);
                prop_assert_eq!(&key1, &key2);

                // Case variations of the subject share a key.
                let upper = SubjectId::new(&subject_raw.to_uppercase());
                prop_assert_eq!(&key1, &ArtifactKey::derive(&upper, &scope));
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_distinct_scope_values_distinct_keys() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &("[a-z0-9]{1,16}", "[a-z0-9]{1,16}"),
            |(value_a, value_b)| {
                prop_assume!(value_a != value_b);

                let subject = SubjectId::new("octocat");
                let key_a =
                    ArtifactKey::derive(&subject, &Scope::new().with("period", &value_a));
                let key_b =
                    ArtifactKey::derive(&subject, &Scope::new().with("period", &value_b));
                prop_assert_ne!(key_a, key_b);
                Ok(())
            },
        )
        .unwrap();
}

//! Integration tests for context names and keys

use context_resolution::{
    register_context_type, ContextKey, ContextName, ContextType, ErrorKind,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityThing {
    owner_id: Option<String>,
    count: Option<u32>,
}

impl ContextType for IdentityThing {
    const NAME: &'static str = "IdentityThing";
    const ALIASES: &'static [&'static str] = &["alias-2", "alias-1", "identity-shared"];
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityOther {
    owner_id: Option<String>,
}

impl ContextType for IdentityOther {
    const NAME: &'static str = "IdentityOther";
    const ALIASES: &'static [&'static str] = &["identity-shared"];
}

fn register() {
    register_context_type::<IdentityThing>();
    register_context_type::<IdentityOther>();
}

#[test]
fn test_any_alias_names_the_type() {
    register();
    let expected = ContextName::of::<IdentityThing>();
    assert_eq!(expected.key(), "identitything|alias-1|alias-2|identity-shared");

    for raw in ["alias-1", "ALIAS-2", "alias-2, alias-1", "IdentityThing / alias-1"] {
        let name = ContextName::parse(raw).unwrap();
        assert!(name.is::<IdentityThing>(), "{raw} should bind");
        assert_eq!(name, expected);
    }
}

#[test]
fn test_shared_alias_is_ambiguous_until_narrowed() {
    register();
    let err = ContextName::parse("identity-shared").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameAmbiguous);

    let name = ContextName::parse("identity-shared|alias-1").unwrap();
    assert!(name.is::<IdentityThing>());
    let name = ContextName::parse("identity-shared IdentityOther").unwrap();
    assert!(name.is::<IdentityOther>());
}

#[test]
fn test_unbound_names_compare_as_sets() {
    let name = ContextName::parse("gamma beta alpha").unwrap();
    assert!(!name.is_bound());
    assert_eq!(name.key(), "beta|alpha|gamma");
    assert_eq!(name, ContextName::parse("alpha|gamma|BETA").unwrap());
    assert_eq!(name.to_string(), "beta|alpha|gamma");

    let narrow = ContextName::parse("beta").unwrap();
    assert!(name.matches(&narrow));
    assert!(!narrow.matches(&name));
}

#[test]
fn test_empty_name_is_rejected() {
    let err = ContextName::parse(" , | ").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_bound_key_uses_type_shape() {
    register();
    let key = ContextKey::from_named("alias-1", Some(json!({ "OWNERID": "o-9" }))).unwrap();
    assert_eq!(
        key.key(),
        r#"{"identitything|alias-1|alias-2|identity-shared":{"ownerId":"o-9"}}"#
    );

    let typed = ContextKey::from_typed(&IdentityThing {
        owner_id: Some("o-9".to_string()),
        count: None,
    })
    .unwrap();
    assert_eq!(key, typed);

    let thing: IdentityThing = key.id_as().unwrap();
    assert_eq!(thing.owner_id.as_deref(), Some("o-9"));
}

#[test]
fn test_bound_key_rejects_unconvertible_id() {
    register();
    let err = ContextKey::from_named("alias-1", Some(json!({ "count": "many" }))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = ContextKey::from_named("alias-1", Some(json!([1, 2]))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_unbound_key_ignores_casing_order_and_defaults() {
    let first = ContextKey::from_named(
        "identity-loose",
        Some(json!({
            "Tags": ["b", "a", "c"],
            "Filter": { "Region": "eu", "sizes": [{ "q": 2 }, { "p": 1 }] },
            "archived": false,
            "cursor": null,
        })),
    )
    .unwrap();
    let second = ContextKey::from_named(
        "identity-loose",
        Some(json!({
            "filter": { "sizes": [{ "p": 1 }, { "q": 2 }], "region": "eu" },
            "tags": ["c", "a", "b"],
        })),
    )
    .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.key(), second.key());
}

#[test]
fn test_different_ids_give_different_keys() {
    let first = ContextKey::from_named("identity-loose", Some(json!({ "id": 1 }))).unwrap();
    let second = ContextKey::from_named("identity-loose", Some(json!({ "id": 2 }))).unwrap();
    let other_name = ContextKey::from_named("identity-tight", Some(json!({ "id": 1 }))).unwrap();

    assert_ne!(first, second);
    assert_ne!(first, other_name);
}

#[test]
fn test_key_parses_from_its_canonical_string() {
    register();
    let key = ContextKey::from_named("alias-2", Some(json!({ "ownerId": "o-1", "count": 3 })))
        .unwrap();
    let parsed = ContextKey::parse(key.key()).unwrap();
    assert_eq!(parsed, key);
    assert!(parsed.name().is::<IdentityThing>());

    let err = ContextKey::parse(r#"{"a": 1, "b": 2}"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

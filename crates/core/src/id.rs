//! Unique identifiers for pybridge entities.
//!
//! Strongly-typed UUID identifiers built on
//! [`domain-key`](https://crates.io/crates/domain-key) `Uuid<D>` wrappers.
//! Each identifier has its own domain marker, so a [`RequestId`] can never
//! be passed where a [`SessionId`] is expected.
//!
//! - [`SessionId`]: one initialized interpreter session. Every input request
//!   carries the session that issued it; tearing the session down makes all
//!   of its requests unanswerable.
//! - [`RequestId`]: correlates one input request with exactly one response.
//!
//! Both are `Copy` and support `v4()`, `nil()`, `parse(&str)`, serde (as a
//! UUID string), `Display`, `FromStr`, `Eq`, `Ord` and `Hash`.

use domain_key::define_uuid;

// Re-export for downstream parse error handling
pub use domain_key::UuidParseError;

define_uuid!(pub SessionIdDomain => SessionId);
define_uuid!(pub RequestIdDomain => RequestId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_v4_creates_non_nil_uuid() {
        let id = SessionId::v4();
        assert!(!id.is_nil());
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::v4(), RequestId::v4());
    }

    #[test]
    fn id_nil_creates_zero_valued_uuid() {
        let id = SessionId::nil();
        assert!(id.is_nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn id_parse_valid_uuid_string_succeeds() {
        let id = RequestId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert!(!id.is_nil());
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn id_parse_invalid_string_returns_error() {
        assert!(RequestId::parse("not-a-uuid").is_err());
        assert!("".parse::<SessionId>().is_err());
    }

    #[test]
    fn id_serializes_as_plain_string() {
        let id = RequestId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn id_from_uuid_roundtrips() {
        let raw = uuid::Uuid::new_v4();
        let typed = SessionId::from(raw);
        let back: uuid::Uuid = typed.get();
        assert_eq!(raw, back);
    }

    #[test]
    fn id_domain_returns_type_name() {
        assert_eq!(SessionId::nil().domain(), "SessionId");
    }
}

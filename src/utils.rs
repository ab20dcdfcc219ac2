use chrono::Utc;
use rand::Rng;

/// Strips an optional `Bearer ` scheme from an authorization value.
pub fn bearer_token(value: &str) -> &str {
    let value = value.trim();
    match value.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => value[7..].trim_start(),
        _ => value,
    }
}

/// Random id for a new chat message. Not guaranteed unique; nothing is persisted.
pub fn new_message_id() -> u64 {
    rand::thread_rng().gen()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_scheme_is_optional() {
        assert_eq!(bearer_token("Bearer abc.def"), "abc.def");
        assert_eq!(bearer_token("bearer   abc"), "abc");
        assert_eq!(bearer_token("abc.def"), "abc.def");
        assert_eq!(bearer_token("Bear"), "Bear");
    }
}

//! Resource naming and label encoding.
//!
//! Compute names must be lowercase RFC1035 labels of at most 63 characters;
//! label keys and values only admit `[a-z0-9_-]`. These helpers map arbitrary
//! cluster and object names into those alphabets deterministically.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::{InfraError, Result};

/// Maximum length of a compute resource name.
pub const MAX_NAME_LENGTH: usize = 63;

/// Label carrying the (safe) cluster name on cluster-owned resources.
pub const LABEL_CLUSTER_NAME: &str = "k8s-io-cluster-name";

/// Prefix of role labels, e.g. `k8s-io-role-master`.
pub const LABEL_ROLE_PREFIX: &str = "k8s-io-role-";

/// Prefix of etcd membership labels on control-plane volumes.
pub const LABEL_ETCD_PREFIX: &str = "k8s-io-etcd-";

/// Bytes escaped in a URL path segment or query value: all but RFC 3986 unreserved.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Lowercase base32 "extended hex" alphabet.
const BASE32_HEX: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Number of hash characters appended by [`limited_length_name`].
const HASH_LENGTH: usize = 6;

/// 32-bit FNV-1a hash.
fn fnv1a_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    data.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
    })
}

/// First six base32hex characters of the big-endian encoding of `value`.
fn hash6(value: u32) -> String {
    (0..HASH_LENGTH)
        .map(|i| {
            let shift = 27 - 5 * i;
            // Each group is masked to five bits, so the index is always in range.
            char::from(BASE32_HEX[((value >> shift) & 0x1f) as usize])
        })
        .collect()
}

/// Truncates `s` to at most `max` bytes without splitting a character.
fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Limits `s` to `n` bytes, replacing the tail with a short hash when it is too long.
///
/// Names at or under the limit are returned unchanged. Longer names become
/// `s[..n-7] + "-" + hash6` where `hash6` is the first six lowercase base32hex
/// characters of the FNV-1a hash of the full input.
#[must_use]
pub fn limited_length_name(s: &str, n: usize) -> String {
    if s.len() <= n {
        return s.to_string();
    }
    let hash = hash6(fnv1a_32(s.as_bytes()));
    let base = truncate_at_boundary(s, n.saturating_sub(HASH_LENGTH + 1));
    format!("{base}-{hash}")
}

/// Cluster name with dots replaced, usable inside resource names and labels.
#[must_use]
pub fn safe_cluster_name(cluster_name: &str) -> String {
    cluster_name.replace('.', "-")
}

/// Coerces an arbitrary string into a lowercase RFC1035 label.
fn rfc1035(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if !out.starts_with(|c: char| c.is_ascii_lowercase()) {
        out.insert(0, 'x');
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Name for a cluster-owned object: `<name>-<cluster>` as a valid RFC1035 name of at most 63 characters.
#[must_use]
pub fn safe_object_name(name: &str, cluster_name: &str) -> String {
    let joined = format!("{name}-{}", safe_cluster_name(cluster_name));
    limited_length_name(&rfc1035(&joined), MAX_NAME_LENGTH)
}

/// Encodes an arbitrary string into the label alphabet.
///
/// `[0-9a-z]` pass through; every other byte becomes `-` followed by two lowercase hex digits.
#[must_use]
pub fn encode_label(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
            out.push(char::from(byte));
        } else {
            out.push('-');
            out.push_str(&hex::encode([byte]));
        }
    }
    out
}

/// Reverses [`encode_label`].
///
/// # Errors
///
/// Returns an error on a malformed `-xx` group or if the decoded bytes are not UTF-8.
pub fn decode_label(s: &str) -> Result<String> {
    let mut groups = s.split('-');
    let mut out = groups.next().unwrap_or_default().as_bytes().to_vec();
    for group in groups {
        let escape = group
            .get(..2)
            .ok_or_else(|| InfraError::internal(format!("truncated escape in label {s:?}")))?;
        let byte = hex::decode(escape)
            .map_err(|e| InfraError::internal(format!("invalid escape in label {s:?}: {e}")))?;
        out.extend_from_slice(&byte);
        out.extend_from_slice(&group.as_bytes()[2..]);
    }
    String::from_utf8(out).map_err(|e| InfraError::internal(format!("invalid utf-8 in label {s:?}: {e}")))
}

/// Decodes `%xx` escapes of a URL path segment.
///
/// # Errors
///
/// Returns an error if the decoded bytes are not UTF-8.
pub fn percent_decode(s: &str) -> Result<String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| InfraError::internal(format!("invalid utf-8 in {s:?}: {e}")))
}

/// Encodes a string for use as a single URL path segment or query value.
#[must_use]
pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

/// Network tag carried by instances of a role, e.g. `mycluster-example-com-k8s-io-role-node`.
///
/// Control-plane instances keep the historical `master` role name.
#[must_use]
pub fn tag_for_role(cluster_name: &str, role_label: &str) -> String {
    limited_length_name(
        &format!("{}-{LABEL_ROLE_PREFIX}{role_label}", safe_cluster_name(cluster_name)),
        MAX_NAME_LENGTH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limited_length_short_names_unchanged() {
        assert_eq!(limited_length_name("nodes", 63), "nodes");
        assert_eq!(limited_length_name("abcdefgh", 8), "abcdefgh");
    }

    #[test]
    fn test_limited_length_bounds_and_determinism() {
        let inputs = [
            "a-very-long-instance-group-name-for-the-cluster-testcluster-test-com",
            "b-very-long-instance-group-name-for-the-cluster-testcluster-test-com",
            "ñandú-ñandú-ñandú-ñandú",
        ];
        for n in [8, 12, 32, 63] {
            for s in inputs {
                let limited = limited_length_name(s, n);
                assert!(limited.len() <= n, "{limited} longer than {n}");
                assert_eq!(limited, limited_length_name(s, n));
            }
        }
        assert_ne!(
            limited_length_name(inputs[0], 32),
            limited_length_name(inputs[1], 32)
        );
    }

    #[test]
    fn test_limited_length_shape() {
        let s = "abcdefghijklmnopqrstuvwxyz";
        let limited = limited_length_name(s, 16);
        assert_eq!(limited.len(), 16);
        assert!(limited.starts_with("abcdefghi-"));
        assert!(limited[10..].chars().all(|c| BASE32_HEX.contains(&(c as u8))));
    }

    #[test]
    fn test_fnv_known_vector() {
        // FNV-1a 32 of "a"
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
    }

    #[test]
    fn test_label_round_trip() {
        for s in ["", "simple", "Upper.Case/Path", "a-b_c d", "etcd/main,events", "日本語 ✓"] {
            let encoded = encode_label(s);
            assert!(encoded.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            assert_eq!(decode_label(&encoded).expect("decodes"), s);
        }
        assert_eq!(encode_label("a/b"), "a-2fb");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_label("abc-").is_err());
        assert!(decode_label("abc-z1").is_err());
        assert!(decode_label("-ff").is_err());
    }

    #[test]
    fn test_safe_object_name() {
        assert_eq!(
            safe_object_name("node-to-node", "testcluster.test.com"),
            "node-to-node-testcluster-test-com"
        );
        assert_eq!(safe_object_name("API", "Foo.Bar"), "api-foo-bar");
        assert_eq!(safe_object_name("1st", "c.d"), "x1st-c-d");
        let long = safe_object_name(&"x".repeat(80), "cluster.example.com");
        assert!(long.len() <= MAX_NAME_LENGTH);
        assert_eq!(long, safe_object_name(&"x".repeat(80), "cluster.example.com"));
    }

    #[test]
    fn test_tag_for_role() {
        assert_eq!(
            tag_for_role("testcluster.test.com", "master"),
            "testcluster-test-com-k8s-io-role-master"
        );
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("cluster/config"), "cluster%2Fconfig");
        assert_eq!(percent_encode("a b~c.d"), "a%20b~c.d");
        assert_eq!(percent_decode("cluster%2Fconfig").expect("decodes"), "cluster/config");
        assert!(percent_decode("%ff").is_err());
    }
}

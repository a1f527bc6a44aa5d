// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::storage::StorageError;

/// Replace every '/' in a user-supplied object name with '-'.
///
/// Applied uniformly on writes and reads; the mapping is lossy, so the
/// caller's original name is preserved verbatim in the object metadata.
pub fn normalize_object_name(object_name: &str) -> String {
    object_name.replace('/', "-")
}

pub fn validate_object_name(object_name: &str) -> Result<(), StorageError> {
    if object_name.trim().is_empty() {
        return Err(StorageError::InvalidArgument(
            "object name must be non-empty".into(),
        ));
    }
    Ok(())
}

/// Compare a caller-supplied MD5 hex digest (possibly ETag-quoted) against
/// the computed one. The comparison runs over the decoded bytes in constant
/// time so a mismatch position cannot leak through timing.
pub fn is_md5_sum_equal(expected: &str, computed: &str) -> Result<(), StorageError> {
    let expected = expected.trim().trim_matches('"');
    let computed = computed.trim();
    if expected.is_empty() || computed.is_empty() {
        return Err(StorageError::InvalidArgument(
            "md5 digest must be non-empty".into(),
        ));
    }
    let expected_raw = hex::decode(expected)
        .map_err(|_| StorageError::InvalidArgument(format!("invalid md5 hex: {expected}")))?;
    let computed_raw = hex::decode(computed)
        .map_err(|_| StorageError::InvalidArgument(format!("invalid md5 hex: {computed}")))?;

    let mismatch = if expected_raw.len() != computed_raw.len() {
        1u8
    } else {
        expected_raw
            .iter()
            .zip(computed_raw.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
    };
    if mismatch != 0 {
        return Err(StorageError::BadDigest {
            expected: expected.to_string(),
            computed: computed.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_replaces_every_slash() {
        assert_eq!(
            normalize_object_name("this/is/my/deep/directory/structure"),
            "this-is-my-deep-directory-structure"
        );
        assert_eq!(normalize_object_name("plain"), "plain");
        assert_eq!(normalize_object_name("a/b"), "a-b");
    }

    #[test]
    fn object_name_must_be_non_blank() {
        assert!(validate_object_name("x").is_ok());
        assert!(matches!(
            validate_object_name("   "),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn md5_comparison_accepts_equal_digests() {
        let digest = "5d41402abc4b2a76b9719d911017c592";
        assert!(is_md5_sum_equal(digest, digest).is_ok());
        assert!(is_md5_sum_equal(&format!("\"{digest}\""), digest).is_ok());
    }

    #[test]
    fn md5_comparison_rejects_mismatch() {
        let computed = "5d41402abc4b2a76b9719d911017c592";
        assert!(matches!(
            is_md5_sum_equal("deadbeefdeadbeefdeadbeefdeadbeef", computed),
            Err(StorageError::BadDigest { .. })
        ));
        // A digest of the wrong length is still a digest mismatch.
        assert!(matches!(
            is_md5_sum_equal("deadbeef", computed),
            Err(StorageError::BadDigest { .. })
        ));
    }

    #[test]
    fn md5_comparison_rejects_bad_inputs() {
        assert!(matches!(
            is_md5_sum_equal("", "5d41402abc4b2a76b9719d911017c592"),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            is_md5_sum_equal("not-hex!", "5d41402abc4b2a76b9719d911017c592"),
            Err(StorageError::InvalidArgument(_))
        ));
    }
}

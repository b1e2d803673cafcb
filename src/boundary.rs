use crate::constants;
use crate::helpers;

/// Generates a fresh multipart boundary.
///
/// The boundary is a fixed prefix followed by 32 random alphanumeric
/// characters, so it never needs quoting in a `Content-Type` header.
///
/// # Examples
///
/// ```
/// let a = multiform::generate_boundary();
/// let b = multiform::generate_boundary();
///
/// assert_ne!(a, b);
/// assert!(a.starts_with("----MultiformBoundary"));
/// ```
pub fn generate_boundary() -> String {
    let mut boundary = String::with_capacity(constants::BOUNDARY_PREFIX.len() + constants::BOUNDARY_RANDOM_LEN);
    boundary.push_str(constants::BOUNDARY_PREFIX);
    boundary.push_str(&helpers::random_alphanumeric(constants::BOUNDARY_RANDOM_LEN));
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_boundary_shape() {
        let boundary = generate_boundary();

        assert_eq!(
            boundary.len(),
            constants::BOUNDARY_PREFIX.len() + constants::BOUNDARY_RANDOM_LEN
        );
        // RFC 2046 caps boundaries at 70 characters.
        assert!(boundary.len() <= 70);
        assert!(boundary[constants::BOUNDARY_PREFIX.len()..]
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_boundaries_are_unique() {
        let boundaries = (0..1000).map(|_| generate_boundary()).collect::<HashSet<_>>();
        assert_eq!(boundaries.len(), 1000);
    }

    #[test]
    fn test_boundary_is_parseable() {
        let boundary = generate_boundary();
        let content_type = format!("multipart/form-data; boundary={}", boundary);
        assert_eq!(crate::parse_boundary(content_type), Ok(boundary));
    }
}

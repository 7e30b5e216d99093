use keel_common::{IngestConfig, KeelError, error::Result};

/// Checks a raw part number and declared size before any collaborator is
/// contacted. Returns the parsed part number.
pub fn validate_part(config: &IngestConfig, part_number: &str, size: u64) -> Result<u32> {
    let number = parse_part_number(config, part_number)?;
    if size > config.max_part_size {
        return Err(KeelError::EntityTooLarge {
            size,
            max_size: config.max_part_size,
        });
    }
    Ok(number)
}

fn parse_part_number(config: &IngestConfig, raw: &str) -> Result<u32> {
    let number: i64 = raw
        .trim()
        .parse()
        .map_err(|_| KeelError::InvalidArgument(format!("part number must be an integer: {raw}")))?;
    if number < 1 {
        return Err(KeelError::InvalidArgument(format!(
            "part number must be at least 1: {number}"
        )));
    }
    if number > i64::from(config.max_part_number) {
        return Err(KeelError::TooManyParts {
            part_number: number,
            max_part_number: config.max_part_number,
        });
    }
    u32::try_from(number).map_err(|_| KeelError::InvalidArgument(format!("part number: {number}")))
}

/// Zero-padded so that lexicographic order matches numeric order.
pub fn pad_part_number(part_number: u32, width: usize) -> String {
    format!("{part_number:0width$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_number_bounds() {
        let config = IngestConfig::default();
        assert_eq!(validate_part(&config, "1", 0).unwrap(), 1);
        assert_eq!(validate_part(&config, "10000", 0).unwrap(), 10_000);

        assert!(matches!(
            validate_part(&config, "0", 0),
            Err(KeelError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_part(&config, "-4", 0),
            Err(KeelError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_part(&config, "2.5", 0),
            Err(KeelError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_part(&config, "abc", 0),
            Err(KeelError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_part(&config, "10001", 0),
            Err(KeelError::TooManyParts {
                part_number: 10_001,
                max_part_number: 10_000
            })
        ));
    }

    #[test]
    fn size_limit_is_inclusive() {
        let config = IngestConfig::default();
        assert!(validate_part(&config, "1", 5_368_709_120).is_ok());
        assert!(matches!(
            validate_part(&config, "1", 5_368_709_121),
            Err(KeelError::EntityTooLarge { .. })
        ));
    }

    #[test]
    fn padding_sorts_numerically() {
        assert_eq!(pad_part_number(1, 5), "00001");
        assert_eq!(pad_part_number(10_000, 5), "10000");

        let padded: Vec<_> = [1, 2, 9, 10, 99, 100, 1_000, 9_999, 10_000]
            .into_iter()
            .map(|n| pad_part_number(n, 5))
            .collect();
        assert!(padded.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

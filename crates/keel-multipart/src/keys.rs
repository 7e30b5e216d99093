//! Composite keys inside a shadow bucket. Every key built for one request
//! must use the same splitter.

use keel_common::IngestConfig;

pub fn overview_key(config: &IngestConfig, splitter: char, object_key: &str, upload_id: &str) -> String {
    format!(
        "{}{splitter}{object_key}{splitter}{upload_id}",
        config.overview_prefix
    )
}

pub fn part_key(upload_id: &str, splitter: char, padded_part_number: &str) -> String {
    format!("{upload_id}{splitter}{padded_part_number}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_use_the_given_splitter() {
        let config = IngestConfig::default();
        assert_eq!(
            overview_key(&config, '|', "photos/cat.jpg", "abc"),
            "overview|photos/cat.jpg|abc"
        );
        assert_eq!(
            overview_key(&config, '.', "cat.jpg", "abc"),
            "overview.cat.jpg.abc"
        );
        assert_eq!(part_key("abc", '|', "00003"), "abc|00003");
    }
}

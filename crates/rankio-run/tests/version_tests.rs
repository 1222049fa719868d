//! Build stamps used by `--version`.

#[test]
fn build_date_is_a_calendar_date() {
    let date = env!("RANKIO_BUILD_DATE");
    let parts: Vec<&str> = date.split('-').collect();
    assert_eq!(parts.len(), 3, "got {date:?}");
    assert_eq!(parts[0].len(), 4);
    assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())), "got {date:?}");
}

#[test]
fn revision_is_never_empty() {
    let rev = env!("RANKIO_GIT_HASH");
    assert!(!rev.is_empty());
    assert!(!rev.contains(char::is_whitespace), "got {rev:?}");
}

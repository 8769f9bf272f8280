use super::*;

#[test]
fn absent_edit_fields_leave_attributes_untouched() {
    let req: ItemEditsRequest = serde_json::from_str(r#"{"title": "renamed"}"#).expect("decode");
    assert_eq!(req.title.as_deref(), Some("renamed"));
    assert_eq!(req.description, None);
    assert_eq!(req.due_date, None);
}

#[test]
fn explicit_null_edit_fields_decode_as_clears() {
    let req: ItemEditsRequest =
        serde_json::from_str(r#"{"description": null, "due_date": null}"#).expect("decode");
    assert_eq!(req.title, None);
    assert_eq!(req.description, Some(None));
    assert_eq!(req.due_date, Some(None));
}

#[test]
fn valued_edit_fields_decode_as_replacements() {
    let req: ItemEditsRequest =
        serde_json::from_str(r#"{"description": "pack the server room", "due_date": "2026-09-01"}"#)
            .expect("decode");
    assert_eq!(req.description, Some(Some("pack the server room".to_string())));
    assert_eq!(
        req.due_date,
        Some(Some(NaiveDate::from_ymd_opt(2026, 9, 1).expect("date")))
    );
}

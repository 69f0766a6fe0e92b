// src/export.rs

//! Pure serializers for the two export formats.
//!
//! Both operate on a snapshot read model loaded by the export handlers: the
//! exam's ordered item/sub-question structure, the application's rows in
//! row-number order, and the captured response/score maps. Re-running either
//! serializer on an unchanged snapshot yields byte-identical output.

use std::collections::HashMap;

use csv::WriterBuilder;

use crate::models::exam::ScoringType;
use crate::scoring::resolve_item_digit;

/// One item of the exam as the serializers see it: its ordered sub-questions
/// and nothing else.
#[derive(Debug, Clone)]
pub struct ItemColumn {
    pub id: i64,
    pub code: String,
    pub scoring_type: ScoringType,
    pub subquestions: Vec<SubQuestionRef>,
}

#[derive(Debug, Clone)]
pub struct SubQuestionRef {
    pub id: i64,
    pub order_index: i64,
}

/// One respondent row of the application.
#[derive(Debug, Clone)]
pub struct ExportRow {
    pub id: i64,
    pub row_number: i64,
    pub reference_code: Option<String>,
}

/// Raw captured value for one (row, sub-question) cell of the pivot table.
#[derive(Debug, Clone, Default)]
pub struct PivotCell {
    pub text_response: Option<String>,
    pub option_label: Option<String>,
}

/// Serializes the Winsteps score file: one line per row, one digit per item
/// in exam order. A stored item score wins over the live derivation; items
/// with no sub-questions and no stored score are skipped without padding.
///
/// `item_scores` is keyed by (row_id, item_id); `correct_responses` by
/// (row_id, subquestion_id).
pub fn winsteps_document(
    items: &[ItemColumn],
    rows: &[ExportRow],
    item_scores: &HashMap<(i64, i64), i64>,
    correct_responses: &HashMap<(i64, i64), bool>,
) -> String {
    let mut lines = Vec::with_capacity(rows.len());

    for row in rows {
        let mut score_string = String::new();
        for item in items {
            let direct = item_scores.get(&(row.id, item.id)).copied();
            let total = item.subquestions.len();
            let correct = item
                .subquestions
                .iter()
                .filter(|sq| {
                    correct_responses
                        .get(&(row.id, sq.id))
                        .copied()
                        .unwrap_or(false)
                })
                .count();

            if let Some(digit) = resolve_item_digit(direct, item.scoring_type, total, correct) {
                score_string.push_str(&digit.to_string());
            }
        }
        lines.push(score_string);
    }

    lines.join("\n")
}

/// Builds the pivot column plan: `(column_name, subquestion_id)` per
/// sub-question, in item then sub-question order. Single-sub-question items
/// use the bare item code; multi-sub-question items use `{code}_{order}`.
pub fn pivot_columns(items: &[ItemColumn]) -> Vec<(String, i64)> {
    let mut columns = Vec::new();
    for item in items {
        if item.subquestions.len() == 1 {
            columns.push((item.code.clone(), item.subquestions[0].id));
        } else {
            for sq in &item.subquestions {
                columns.push((format!("{}_{}", item.code, sq.order_index), sq.id));
            }
        }
    }
    columns
}

/// Serializes the pivot CSV: UTF-8 BOM, `;`-delimited, header row
/// `IDENTIFICATION` + column plan, then one row per respondent holding the
/// raw captured values (free text beats option label; empty when nothing was
/// captured). Scores are deliberately absent from this view.
pub fn pivot_document(
    items: &[ItemColumn],
    rows: &[ExportRow],
    cells: &HashMap<(i64, i64), PivotCell>,
) -> Result<Vec<u8>, csv::Error> {
    let columns = pivot_columns(items);

    // BOM so spreadsheet tools pick up UTF-8.
    let mut buf = vec![0xEF, 0xBB, 0xBF];
    {
        let mut writer = WriterBuilder::new().delimiter(b';').from_writer(&mut buf);

        let mut header = vec!["IDENTIFICATION".to_string()];
        header.extend(columns.iter().map(|(name, _)| name.clone()));
        writer.write_record(&header)?;

        for row in rows {
            let identification = row
                .reference_code
                .clone()
                .unwrap_or_else(|| format!("Row-{}", row.row_number));

            let mut record = vec![identification];
            for (_, subquestion_id) in &columns {
                let value = match cells.get(&(row.id, *subquestion_id)) {
                    Some(cell) => match &cell.text_response {
                        Some(text) if !text.is_empty() => text.clone(),
                        _ => cell.option_label.clone().unwrap_or_default(),
                    },
                    None => String::new(),
                };
                record.push(value);
            }
            writer.write_record(&record)?;
        }

        writer.flush()?;
    }

    Ok(buf)
}

/// Builds the download filename for an export: spaces in the exam and
/// application names become underscores.
pub fn export_filename(prefix: &str, exam_name: &str, application_name: &str, ext: &str) -> String {
    format!(
        "{}_{}_{}.{}",
        prefix,
        exam_name.replace(' ', "_"),
        application_name.replace(' ', "_"),
        ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::ScoringType::{Dichotomous, Polytomous};

    fn item(id: i64, code: &str, scoring: ScoringType, subq_ids: &[i64]) -> ItemColumn {
        ItemColumn {
            id,
            code: code.to_string(),
            scoring_type: scoring,
            subquestions: subq_ids
                .iter()
                .enumerate()
                .map(|(i, sq_id)| SubQuestionRef {
                    id: *sq_id,
                    order_index: (i + 1) as i64,
                })
                .collect(),
        }
    }

    fn row(id: i64, number: i64, code: Option<&str>) -> ExportRow {
        ExportRow {
            id,
            row_number: number,
            reference_code: code.map(str::to_string),
        }
    }

    #[test]
    fn winsteps_derives_digits_from_responses() {
        let items = vec![
            item(1, "EA01", Dichotomous, &[10, 11]),
            item(2, "EA02", Polytomous, &[12, 13, 14]),
        ];
        let rows = vec![row(100, 1, None)];

        // EA01 fully correct, EA02 one of three correct.
        let correct = HashMap::from([
            ((100, 10), true),
            ((100, 11), true),
            ((100, 12), true),
            ((100, 13), false),
        ]);

        let doc = winsteps_document(&items, &rows, &HashMap::new(), &correct);
        assert_eq!(doc, "11");
    }

    #[test]
    fn winsteps_prefers_stored_scores() {
        let items = vec![item(1, "EA01", Dichotomous, &[10])];
        let rows = vec![row(100, 1, None)];

        // The response says correct but the stored score says 0.
        let correct = HashMap::from([((100, 10), true)]);
        let scores = HashMap::from([((100, 1), 0)]);

        let doc = winsteps_document(&items, &rows, &scores, &correct);
        assert_eq!(doc, "0");
    }

    #[test]
    fn winsteps_skips_items_without_subquestions() {
        let items = vec![
            item(1, "EA01", Dichotomous, &[10]),
            item(2, "EA02", Dichotomous, &[]),
            item(3, "EA03", Polytomous, &[11, 12]),
        ];
        let rows = vec![row(100, 1, None)];
        let correct = HashMap::from([((100, 10), true), ((100, 11), true), ((100, 12), true)]);

        // EA02 contributes nothing: line has two digits, not three.
        let doc = winsteps_document(&items, &rows, &HashMap::new(), &correct);
        assert_eq!(doc, "12");

        // ...but a stored score for it still gets emitted.
        let scores = HashMap::from([((100, 2), 1)]);
        let doc = winsteps_document(&items, &rows, &scores, &correct);
        assert_eq!(doc, "112");
    }

    #[test]
    fn winsteps_rows_emit_in_given_order() {
        let items = vec![item(1, "EA01", Dichotomous, &[10])];
        let rows = vec![row(100, 1, None), row(101, 2, None), row(102, 3, None)];
        let correct = HashMap::from([((101, 10), true)]);

        let doc = winsteps_document(&items, &rows, &HashMap::new(), &correct);
        assert_eq!(doc, "0\n1\n0");
    }

    #[test]
    fn winsteps_is_idempotent() {
        let items = vec![item(1, "EA01", Polytomous, &[10, 11])];
        let rows = vec![row(100, 1, None), row(101, 2, None)];
        let correct = HashMap::from([((100, 10), true)]);
        let scores = HashMap::from([((101, 1), 2)]);

        let first = winsteps_document(&items, &rows, &scores, &correct);
        let second = winsteps_document(&items, &rows, &scores, &correct);
        assert_eq!(first, second);
    }

    #[test]
    fn pivot_columns_suffix_only_multi_subquestion_items() {
        let items = vec![
            item(1, "EA01", Dichotomous, &[10, 11]),
            item(2, "EA02", Dichotomous, &[12]),
        ];

        let columns = pivot_columns(&items);
        let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["EA01_1", "EA01_2", "EA02"]);
    }

    #[test]
    fn pivot_document_reports_raw_values_only() {
        let items = vec![
            item(1, "EA01", Dichotomous, &[10, 11]),
            item(2, "EA02", Polytomous, &[12]),
        ];
        let rows = vec![row(100, 1, Some("STU-AB12CD")), row(101, 2, None)];

        let cells = HashMap::from([
            (
                (100, 10),
                PivotCell {
                    text_response: None,
                    option_label: Some("a".to_string()),
                },
            ),
            (
                (100, 12),
                PivotCell {
                    text_response: Some("free answer".to_string()),
                    option_label: None,
                },
            ),
            (
                (101, 11),
                PivotCell {
                    text_response: None,
                    option_label: Some("c".to_string()),
                },
            ),
        ]);

        let bytes = pivot_document(&items, &rows, &cells).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert_eq!(
            text,
            "\u{feff}IDENTIFICATION;EA01_1;EA01_2;EA02\n\
             STU-AB12CD;a;;free answer\n\
             Row-2;;c;\n"
        );
    }

    #[test]
    fn pivot_text_response_beats_option_label() {
        let items = vec![item(1, "EA01", Dichotomous, &[10])];
        let rows = vec![row(100, 1, None)];
        let cells = HashMap::from([(
            (100, 10),
            PivotCell {
                text_response: Some("typed".to_string()),
                option_label: Some("b".to_string()),
            },
        )]);

        let text = String::from_utf8(pivot_document(&items, &rows, &cells).unwrap()).unwrap();
        assert!(text.ends_with("Row-1;typed\n"));
    }

    #[test]
    fn pivot_is_idempotent() {
        let items = vec![item(1, "EA01", Dichotomous, &[10, 11])];
        let rows = vec![row(100, 1, Some("STU-000001"))];
        let cells = HashMap::from([(
            (100, 10),
            PivotCell {
                text_response: None,
                option_label: Some("a".to_string()),
            },
        )]);

        let first = pivot_document(&items, &rows, &cells).unwrap();
        let second = pivot_document(&items, &rows, &cells).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn filenames_replace_spaces() {
        assert_eq!(
            export_filename("winsteps", "Reading Test", "March 2026", "txt"),
            "winsteps_Reading_Test_March_2026.txt"
        );
        assert_eq!(
            export_filename("pivot", "Math", "Pilot", "csv"),
            "pivot_Math_Pilot.csv"
        );
    }
}

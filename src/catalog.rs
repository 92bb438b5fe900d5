//! Built-in scenarios for the grading application.
//!
//! Relative URLs resolve against the configured base URL and relative upload
//! paths against the test-data directory, so the definitions themselves carry
//! no environment.

use crate::browser::{Target, Viewport};
use crate::config::{DEFAULT_ANSWER_DOCUMENT, DEFAULT_ANSWER_SHEET, GRADING_TIMEOUT_MS};
use crate::scenario::{Comparison, Predicate, Scenario, Step};

/// Script scrolling the document to its end
pub const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Timeout for the Notion export confirmation
const NOTION_UPLOAD_TIMEOUT_MS: u64 = 15_000;

const FILE_INPUT: &str = "input[type=\"file\"]";

/// Every built-in scenario, in run order. `responsive` lists the named
/// viewports the layout check resizes through.
pub fn builtin(responsive: &[(String, Viewport)]) -> Vec<Scenario> {
    vec![
        home_navigation(),
        responsive_layout(responsive),
        batch_grading(),
        notion_export(),
    ]
}

/// Tab switching on the landing page
pub fn home_navigation() -> Scenario {
    Scenario::new(
        "home_navigation",
        vec![
            Step::navigate("/"),
            Step::pause(1000),
            Step::capture("single_scan_default"),
            Step::expect(Predicate::all_of(vec![
                Predicate::body_contains("SMART-GRADER"),
                Predicate::any_text(&["Single Scan", "Batch Grade"]),
            ])),
            Step::click_if_present("text=Batch Grade"),
            Step::pause(1000),
            Step::capture("batch_grade_tab"),
            Step::compare("single_scan_default", "batch_grade_tab", Comparison::Distinct),
            Step::click_if_present("text=Single Scan"),
            Step::pause(1000),
            // returns to the first state, so this capture may repeat it
            Step::capture("back_to_single_scan"),
            Step::compare("batch_grade_tab", "back_to_single_scan", Comparison::Distinct),
            Step::expect(Predicate::body_contains("Click to select a file")),
            Step::click_if_present("text=Teacher Mode"),
            Step::pause(500),
            Step::capture("teacher_mode"),
            Step::expect(Predicate::body_contains("System Active")),
        ],
    )
    .describe("Landing page loads; Single Scan and Batch Grade tabs switch views")
    .with_viewport(Viewport::DESKTOP)
}

/// Layout at each responsive size; identical layouts are allowed
pub fn responsive_layout(viewports: &[(String, Viewport)]) -> Scenario {
    let mut steps = vec![
        Step::navigate("/"),
        Step::click("text=Batch Grade"),
        Step::pause(500),
    ];
    let mut previous: Option<String> = None;
    for (name, viewport) in viewports {
        let label = format!("{}_view", name);
        steps.push(Step::resize(*viewport));
        steps.push(Step::pause(500));
        steps.push(Step::capture(label.clone()));
        if let Some(prev) = previous.replace(label.clone()) {
            steps.push(Step::compare(prev, label, Comparison::Either));
        }
    }
    steps.push(Step::resize(Viewport::DESKTOP));
    steps.push(Step::expect(Predicate::body_contains("Start Batch Grading")));

    Scenario::new("responsive_layout", steps)
        .describe("Batch Grade view renders at responsive sizes")
        .with_viewport(Viewport::DESKTOP)
}

fn open_batch_grade() -> Vec<Step> {
    vec![
        Step::navigate("/"),
        Step::click("text=Batch Grade"),
        Step::pause(500),
    ]
}

/// Attach the answer document and one answer sheet
fn attach_grading_files() -> Vec<Step> {
    vec![
        Step::upload(Target::nth(FILE_INPUT, 0), DEFAULT_ANSWER_DOCUMENT),
        Step::pause(300),
        Step::upload(Target::nth(FILE_INPUT, 1), DEFAULT_ANSWER_SHEET),
        Step::pause(500),
    ]
}

/// Full grading run: upload, wait for results, inspect a student card
pub fn batch_grading() -> Scenario {
    let mut steps = open_batch_grade();
    steps.push(Step::capture("batch_upload"));
    steps.extend(attach_grading_files());
    steps.extend([
        Step::capture("files_selected"),
        Step::click("text=Start Batch Grading"),
        Step::wait(
            Predicate::any_text(&["채점 결과", "Grading Results", "정답지", "Answer Key", "전체 결과"]),
            GRADING_TIMEOUT_MS,
        ),
        Step::pause(1000),
        Step::capture("grading_result"),
        Step::expect(Predicate::any_text(&["채점 결과", "정답지", "Answer Key", "통계", "Statistics"])),
        Step::expect(Predicate::all_of(vec![
            Predicate::any_text(&["정답지", "Answer Key"]),
            Predicate::any_text(&["학생별", "Unknown"]),
            Predicate::any_text(&["통계", "Statistics"]),
            Predicate::any_text(&["전체 결과", "Summary"]),
        ])),
        Step::click_if_present("text=Unknown"),
        Step::pause(800),
        Step::capture("student_expanded"),
        Step::expect(Predicate::any_text(&["OCR", "OMR 카드"])),
        Step::evaluate(SCROLL_TO_BOTTOM),
        Step::pause(500),
        Step::capture("summary"),
    ]);

    Scenario::new("batch_grading", steps)
        .describe("Answer document and sheet upload, grading completes, results render")
        .with_viewport(Viewport::DESKTOP_HD)
}

/// Grading followed by export of the scores to Notion
pub fn notion_export() -> Scenario {
    let mut steps = open_batch_grade();
    steps.extend(attach_grading_files());
    steps.extend([
        Step::click("text=Start Batch Grading"),
        Step::wait_mandatory(
            Predicate::any_text(&["채점 결과", "정답지"]),
            GRADING_TIMEOUT_MS,
        ),
        Step::pause(1000),
        Step::expect(Predicate::body_contains("Notion DB 연동")),
        Step::evaluate(SCROLL_TO_BOTTOM),
        Step::pause(500),
        Step::capture("upload_section"),
        Step::fill("input[placeholder*=\"수학\"]", "E2E테스트"),
        Step::fill("input[placeholder*=\"2026\"]", "2026-02"),
        Step::capture("form_filled"),
        Step::click("text=Notion 업로드"),
        Step::wait(
            Predicate::any_text(&["업로드 완료", "성적이 Notion에"]),
            NOTION_UPLOAD_TIMEOUT_MS,
        ),
        Step::pause(1000),
        Step::capture("upload_result"),
        Step::expect(Predicate::any_text(&["Notion에 저장되었습니다", "업로드 완료"])),
    ]);

    Scenario::new("notion_export", steps)
        .describe("Graded results are exported through the Notion form")
        .with_viewport(Viewport::DESKTOP_HD)
}

mod common;

use common::{form_detail, panel_detail, saved_codes, saved_value, step_fixture};
use qip_autofill::api::HttpMethod::{Get, Put};
use qip_autofill::workflows::steps::StepError;
use serde_json::json;

#[test]
fn form_step_saves_fields_in_document_order() {
    let fixture = step_fixture();
    fixture
        .api
        .respond(
            Get,
            "/step/general_info",
            form_detail(json!([
                {"code": "company_name_en"},
                {"field_type": "text"},
                {"code": "director_invt_applicant_people_information_id"},
                {"code": "land_cost", "validation": {"data_type": "int", "min": 100, "max": 100}},
                {"code": "total", "key_calculates": [
                    {"key_calculate_order": 0, "field_calculate": "land_cost"},
                    {"key_calculate_order": 1, "calculate_sign": "multiply", "base_value": 2}
                ]}
            ])),
        )
        .respond(
            Get,
            "/invt/7/subform/share_holder",
            json!({"data": {"objects": [{"id": 3, "form_data": {
                "share_holder_invt_applicant_people_information_id": "app-99"
            }}]}}),
        )
        .respond(Put, "/invt/7/form/general_info/data/save?", json!({"data": {}}));

    let handled = fixture
        .submitter
        .submit_step("7", "general_info", None)
        .expect("step submitted");
    assert!(handled);

    let body = fixture.api.last_body(Put, "/invt/7/form/general_info/data/save?");
    assert_eq!(
        saved_codes(&body),
        vec![
            "company_name_en",
            "director_invt_applicant_people_information_id",
            "land_cost",
            "total"
        ]
    );
    assert_eq!(
        saved_value(&body, "director_invt_applicant_people_information_id"),
        &json!("app-99")
    );
    assert_eq!(saved_value(&body, "land_cost"), &json!(100));
    assert_eq!(saved_value(&body, "total"), &json!(200.0));
    assert!(body["data"]
        .as_array()
        .expect("entries")
        .iter()
        .all(|entry| entry["comment"].is_null()));
    assert!(fixture
        .api
        .calls_to(Get, "/invt/7/popup_subform/f_invt_project_applicant_information")
        .is_empty());
}

#[test]
fn wrapper_creates_an_empty_row_before_filling_it() {
    let fixture = step_fixture();
    fixture
        .api
        .respond(
            Get,
            "/step/company_composition",
            json!({"data": {"detail": {"forms": null, "lists": [{"code": "board_member"}]}}}),
        )
        .respond(Get, "/invt/7/subform/board_member", json!({"data": {"objects": []}}))
        .respond(
            Get,
            "/invt/7/subform/board_member",
            json!({"data": {"objects": [{"id": 55}]}}),
        )
        .respond(Put, "/invt/7/subform/board_member/data/save?", json!({}))
        .respond(
            Get,
            "/invt/7/subform/board_member?object_id=55",
            panel_detail(json!([{"code": "board_member_note"}])),
        )
        .respond(
            Put,
            "/invt/7/subform/board_member/object/55/data/save?",
            json!({}),
        );

    assert!(fixture
        .submitter
        .submit_step("7", "company_composition", Some("investor-1"))
        .expect("wrapper submitted"));

    let trail: Vec<(String, String)> = fixture
        .api
        .calls()
        .into_iter()
        .map(|call| (call.method.to_string(), call.path))
        .collect();
    let expected = [
        ("GET", "/step/company_composition"),
        ("GET", "/invt/7/subform/board_member"),
        ("PUT", "/invt/7/subform/board_member/data/save?"),
        ("GET", "/invt/7/subform/board_member"),
        ("GET", "/invt/7/subform/board_member"),
        ("PUT", "/invt/7/subform/board_member/object/55/data/save?"),
    ];
    assert_eq!(
        trail,
        expected
            .iter()
            .map(|(method, path)| (method.to_string(), path.to_string()))
            .collect::<Vec<_>>()
    );

    let calls = fixture.api.calls();
    assert_eq!(calls[2].body, Some(json!({"data": [{}]})));
    assert_eq!(calls[4].query_value("object_id"), Some("55"));
    assert_eq!(
        saved_codes(&fixture.api.last_body(Put, "/invt/7/subform/board_member/object/55/data/save?")),
        vec!["board_member_note"]
    );
}

#[test]
fn missing_step_detail_falls_back_to_subform() {
    let fixture = step_fixture();
    fixture
        .api
        .respond(Get, "/invt/7/subform/annex2_1", json!({"data": {"objects": [{"id": "8"}]}}))
        .respond(
            Get,
            "/invt/7/subform/annex2_1?object_id=8",
            panel_detail(json!([{"code": "note"}])),
        )
        .respond(Put, "/invt/7/subform/annex2_1/object/8/data/save?", json!({}));

    assert!(fixture
        .submitter
        .submit_step("7", "annex2_1", None)
        .expect("fallback submitted"));
    assert_eq!(
        fixture
            .api
            .calls_to(Put, "/invt/7/subform/annex2_1/object/8/data/save?")
            .len(),
        1
    );
}

#[test]
fn container_object_id_is_used_after_creating_a_row() {
    let fixture = step_fixture();
    fixture
        .api
        .respond(
            Get,
            "/invt/7/subform/product_and_labor",
            json!({"data": {"objects": [], "investment_info": {"object_id": 77}}}),
        )
        .respond(Put, "/invt/7/subform/product_and_labor/data/save?", json!({}))
        .respond(
            Get,
            "/invt/7/subform/product_and_labor?object_id=77",
            panel_detail(json!([{"code": "product_name_en"}])),
        )
        .respond(
            Put,
            "/invt/7/subform/product_and_labor/object/77/data/save?",
            json!({}),
        );

    fixture
        .submitter
        .submit_subform("7", None, "product_and_labor", None)
        .expect("sub-form saved");
    assert_eq!(
        fixture
            .api
            .calls_to(Put, "/invt/7/subform/product_and_labor/data/save?")
            .len(),
        1
    );
}

#[test]
fn subform_without_any_object_id_is_an_error() {
    let fixture = step_fixture();
    fixture
        .api
        .respond(Get, "/invt/7/subform/share_holder", json!({"data": {"objects": null}}))
        .respond(Put, "/invt/7/subform/share_holder/data/save?", json!({}));

    let err = fixture
        .submitter
        .submit_subform("7", Some("company_composition"), "share_holder", None)
        .expect_err("object id required");
    assert!(matches!(err, StepError::MissingObjectId { ref subform } if subform == "share_holder"));
}

#[test]
fn primary_applicant_popup_is_filled_once_per_application() {
    let fixture = step_fixture();
    let popup = "/invt/7/popup_subform/f_invt_project_applicant_information";
    fixture
        .api
        .respond(Get, "/invt/7/subform/share_holder", json!({"data": {"objects": []}}))
        .respond(
            Get,
            popup,
            json!({"data": {"objects": [], "investment_info": {"object_id": "pop-1"}}}),
        )
        .respond(
            Get,
            &format!("{popup}?object_id=pop-1"),
            panel_detail(json!([{"code": "fullname"}, {"code": "email"}])),
        )
        .respond(Put, &format!("{popup}/object/pop-1/data/save?"), json!({}));
    for step in ["invt_info", "investment_location"] {
        fixture
            .api
            .respond(
                Get,
                &format!("/step/{step}"),
                form_detail(json!([{"code": "owner_invt_applicant_people_information_id"}])),
            )
            .respond(Put, &format!("/invt/7/form/{step}/data/save?"), json!({}));
    }

    for step in ["invt_info", "investment_location"] {
        fixture
            .submitter
            .submit_step("7", step, None)
            .expect("step submitted");
        let body = fixture.api.last_body(Put, &format!("/invt/7/form/{step}/data/save?"));
        assert_eq!(
            saved_value(&body, "owner_invt_applicant_people_information_id"),
            &json!("pop-1")
        );
    }

    assert_eq!(
        fixture
            .api
            .calls_to(Put, &format!("{popup}/object/pop-1/data/save?"))
            .len(),
        1
    );
    assert_eq!(fixture.applicants.cached("7").as_deref(), Some("pop-1"));
}

#[test]
fn step_list_is_sorted_by_step_order() {
    let fixture = step_fixture();
    fixture.api.respond(
        Get,
        "http://portal.test/api/v2/step",
        json!({"data": {"qip": [
            {"code": "invt_info", "step_order": 2},
            {"code": "general_info", "step_order": "1"},
            {"step_order": 0},
            {"code": "annex2_1", "step_order": 10}
        ]}}),
    );

    let codes: Vec<String> = fixture
        .submitter
        .list_steps(None)
        .expect("steps listed")
        .into_iter()
        .map(|step| step.code)
        .collect();
    assert_eq!(codes, vec!["general_info", "invt_info", "annex2_1"]);
}

#[test]
fn step_list_without_project_type_is_an_error() {
    let fixture = step_fixture();
    fixture.api.respond(
        Get,
        "http://portal.test/api/v2/step",
        json!({"data": {"other": []}}),
    );

    let err = fixture.submitter.list_steps(None).expect_err("missing list");
    assert!(matches!(err, StepError::MissingStepList { .. }));
}

#[test]
fn create_application_reads_investment_info_id() {
    let fixture = step_fixture();
    fixture.api.respond(
        Get,
        "/step/general_info",
        json!({"data": {"investment_info": {"id": 321}}}),
    );

    assert_eq!(
        fixture.submitter.create_application(None).expect("created"),
        "321"
    );
    let call = &fixture.api.calls()[0];
    assert_eq!(call.query_value("type"), Some("qip"));
}

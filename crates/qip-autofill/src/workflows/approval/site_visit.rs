//! Site-visit setup performed before the preliminary review is forwarded.

use serde_json::{json, Value};
use tracing::info;

use crate::api::{data_of, id_text, ApiError, ApiRequest, RemoteApi};
use crate::workflows::schema::generators::{format_date, today};

const MISSION_CHAIR: &str = "7222f2c2-ba81-4393-9443-7bd6af13bd52";
const MISSION_SEC_COMMENT: &str = "8cefdc21-3068-4b13-a671-d4d1d789619c";
const SALUTE: &str = "daaeb978-104f-4684-a958-48fb8440edbb";

struct CompositionMember {
    user_id: &'static str,
    firstname: &'static str,
    lastname: &'static str,
    phone_number: &'static str,
    position: &'static str,
    department: &'static str,
    mission_position: &'static str,
}

impl CompositionMember {
    fn body(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "salute": SALUTE,
            "firstname": self.firstname,
            "lastname": self.lastname,
            "phone_code": "855",
            "phone_number": self.phone_number,
            "position": self.position,
            "department": self.department,
            "mission_position": self.mission_position,
        })
    }
}

const CHAIR: CompositionMember = CompositionMember {
    user_id: "e84fc28a-34e8-4fb4-b9e6-3e236508ed20",
    firstname: "វិសុទ្ធ",
    lastname: "មឿង",
    phone_number: "12860067",
    position: "ប្រធាននាយកដ្ឋានស្តីទី",
    department: "8ddcadea-d98b-4d5d-b0da-2e654248bb4e",
    mission_position: MISSION_CHAIR,
};

const SECRETARY: CompositionMember = CompositionMember {
    user_id: "5b6c8ebd-0947-4741-bac3-50626186af2f",
    firstname: "ស៊ីថា",
    lastname: "គង់",
    phone_number: "47770008",
    position: "តំណាង",
    department: "1f3a211b-bee4-4810-86bb-d93fa14601b8",
    mission_position: MISSION_SEC_COMMENT,
};

fn report_body(today: &str) -> Value {
    json!({
        "check_date": today,
        "committy_comments": [],
        "composition_lead": "គម្រោងវិនិយោគនេះមានគោលបំណងអភិវឌ្ឍអចលនទ្រព្យសម្រាប់ការប្រើប្រាស់ពាណិជ្ជកម្ម និងលំនៅឋាន ដោយផ្អែកលើទីតាំងមានសក្ដានុពល និងតម្រូវការទីផ្សារកំពុងកើនឡើង។",
        "conclusion_comment": "<p>ដោយផ្អែកលើការពិនិត្យទីតាំង ស្ថានភាពទីផ្សារ និងឯកសារពាក់ព័ន្ធ គម្រោងនេះត្រូវបានវាយតម្លៃថាមានភាពអាចអនុវត្តបាន។</p>",
        "contract_rent": "កិច្ចសន្យាជួលមានរយៈពេល 15 ឆ្នាំ ជាមួយលក្ខខណ្ឌកែសម្រួលថ្លៃជួលរៀងរាល់ 3 ឆ្នាំម្តង។",
        "investment_location": "សង្កាត់ទន្លេបាសាក់ ខណ្ឌចំការមន រាជធានីភ្នំពេញ",
        "land_doc": "ដីមានប័ណ្ណកម្មសិទ្ធិប្រភេទ Hard Title។",
        "location_situation": "ទីតាំងស្ថិតនៅជិតផ្លូវធំ មានហេដ្ឋារចនាសម្ព័ន្ធល្អ ងាយស្រួលចូលដំណើរការ។",
        "office_location": "ការិយាល័យគម្រោង ស្ថិតនៅអគារលេខ 45 ផ្លូវ 271 ខណ្ឌចំការមន រាជធានីភ្នំពេញ",
        "site_visit_info": format!("<p>ក្រុមការងារបានចុះពិនិត្យទីតាំងនៅថ្ងៃទី {today}។</p>"),
    })
}

/// Site visit id from a composition response: `site_visit_id`, `id`, then `site_visit.id`.
fn site_visit_id(response: &Value) -> Option<String> {
    let data = data_of(response);
    data.get("site_visit_id")
        .and_then(id_text)
        .or_else(|| data.get("id").and_then(id_text))
        .or_else(|| {
            data.get("site_visit")
                .and_then(|visit| visit.get("id"))
                .and_then(id_text)
        })
}

/// Registers the visit composition, drafts the visit, and files the report for one application.
/// Returns the site visit id used.
pub fn run_pre_steps(
    api: &dyn RemoteApi,
    application_id: &str,
    token: &str,
) -> Result<String, ApiError> {
    let today = format_date(today());

    api.execute(
        ApiRequest::get("/site_visit/composition/form_v2")
            .query("invt_id", application_id)
            .bearer(token),
    )?;

    let composition = format!("/site_visit/{application_id}/composition");
    let mut visit_id = application_id.to_string();
    for member in [CHAIR, SECRETARY] {
        let response = api.execute(
            ApiRequest::post(composition.as_str(), Some(member.body())).bearer(token),
        )?;
        if let Some(id) = site_visit_id(&response) {
            visit_id = id;
        }
    }

    let draft = format!("/site_visit/{visit_id}/draft");
    api.execute(ApiRequest::get(draft.as_str()).bearer(token))?;
    api.execute(
        ApiRequest::put(
            draft.as_str(),
            json!({
                "start_date": today,
                "check_date": today,
                "return_date": today,
                "note": "",
                "document_attachment": "",
                "transportation": "",
            }),
        )
        .bearer(token),
    )?;

    let report = format!("/site_visit_report/{visit_id}");
    api.execute(ApiRequest::get(report.as_str()).bearer(token))?;
    api.execute(ApiRequest::put(report.as_str(), report_body(&today)).bearer(token))?;

    info!(application_id, site_visit = %visit_id, "site visit pre-steps done");
    Ok(visit_id)
}

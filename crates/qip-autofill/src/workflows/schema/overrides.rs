//! Per-step field override tables consulted before the generic resolution rules.

use std::collections::HashMap;

use chrono::Duration;
use rand::{Rng, RngCore};
use serde_json::{json, Value};

use super::calculate::round2;
use super::domain::ResolutionContext;
use super::generators::{digits, format_date, lowercase, pick, today};
use super::media::MediaFolder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Attachment,
    Image,
}

/// What an override table asks the resolver to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    Value(Value),
    /// Upload a random image from a media folder and use the returned file id.
    Upload { kind: UploadKind, folder: MediaFolder },
    /// Upload a sample spreadsheet into an application list and use the server response.
    ListSheet {
        list_code: &'static str,
        folder: &'static str,
        file_name: &'static str,
    },
}

impl OverrideValue {
    fn text(value: impl Into<String>) -> Option<Self> {
        Some(Self::Value(Value::String(value.into())))
    }

    fn attachment(folder: MediaFolder) -> Option<Self> {
        Some(Self::Upload {
            kind: UploadKind::Attachment,
            folder,
        })
    }

    fn image(folder: MediaFolder) -> Option<Self> {
        Some(Self::Upload {
            kind: UploadKind::Image,
            folder,
        })
    }
}

pub trait OverrideProvider: Send + Sync {
    fn override_for(
        &self,
        scope_code: &str,
        field_code: &str,
        context: &mut ResolutionContext,
        rng: &mut dyn RngCore,
    ) -> Option<OverrideValue>;
}

pub type OverrideTable = fn(&str, &mut ResolutionContext, &mut dyn RngCore) -> Option<OverrideValue>;

/// Override tables keyed by step or sub-form code.
#[derive(Clone, Default)]
pub struct OverrideRegistry {
    tables: HashMap<&'static str, OverrideTable>,
}

impl OverrideRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        Self::empty()
            .register("general_info", general_info)
            .register("invt_info", invt_info)
            .register("investment_location", investment_location)
            .register("share_holder", share_holder)
            .register("board_member", board_member)
            .register("f_invt_project_applicant_information", applicant_information)
            .register("product_and_labor", product_and_labor)
            .register("utility_and_env", utility_and_env)
            .register("annex2_1", annex2_1)
            .register("annex2_2", annex2_2)
    }

    pub fn register(mut self, code: &'static str, table: OverrideTable) -> Self {
        self.tables.insert(code, table);
        self
    }

    pub fn codes(&self) -> Vec<&'static str> {
        let mut codes: Vec<_> = self.tables.keys().copied().collect();
        codes.sort_unstable();
        codes
    }
}

impl std::fmt::Debug for OverrideRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideRegistry")
            .field("codes", &self.codes())
            .finish()
    }
}

impl OverrideProvider for OverrideRegistry {
    fn override_for(
        &self,
        scope_code: &str,
        field_code: &str,
        context: &mut ResolutionContext,
        rng: &mut dyn RngCore,
    ) -> Option<OverrideValue> {
        let table = self.tables.get(scope_code)?;
        table(field_code, context, rng)
    }
}

const COMPANY_NAME_PAIRS: &[(&str, &str)] = &[
    ("សេង ហួរ", "SENG HOUR"),
    ("លី ម៉េង", "LI MENG"),
    ("អេ អាយ ភី អិល តិចណូឡូជី", "AIPL TECHNOLOGY"),
    ("អាន់គ័រ គន្សត្រាក់សិន", "ANGKOR CONSTRUCTION"),
    ("វត្តននា អ៊ិនដាស្ត្រី", "VATTANANA INDUSTRY"),
    ("រតនៈ អភិវឌ្ឍន៍", "RATTANA DEVELOPMENT"),
    ("សុភមង្គល ឧស្សាហកម្ម", "SOPHEAKMONGKOL INDUSTRIAL"),
    ("មេគង្គ ត្រេតឌីង", "MEKONG TRADING"),
    ("ហេង លី អ៊ិនជីនៀរីង", "HENG LY ENGINEERING"),
    ("ភ្នំពេញ ឌីជីថល សឺវីស", "PHNOM PENH DIGITAL SERVICES"),
];

fn khmer_company(index: usize) -> String {
    format!("ក្រុមហ៊ុន {}", COMPANY_NAME_PAIRS[index].0)
}

fn english_company(index: usize) -> String {
    format!("{} CO., LTD.", COMPANY_NAME_PAIRS[index].1)
}

/// Keeps the Khmer and English company names from the same pair.
fn company_pair_index(context: &ResolutionContext, rng: &mut dyn RngCore) -> usize {
    let known = ["company_name_km", "company_name_en"]
        .iter()
        .filter_map(|code| context.get(code).and_then(Value::as_str))
        .find_map(|name| {
            (0..COMPANY_NAME_PAIRS.len())
                .find(|&index| name == khmer_company(index) || name == english_company(index))
        });
    known.unwrap_or_else(|| rng.gen_range(0..COMPANY_NAME_PAIRS.len()))
}

const STREETS_KM: &[&str] = &[
    "ផ្លូវ ១២០",
    "ផ្លូវ ២៧១",
    "ផ្លូវ ១៩៨៦",
    "ផ្លូវ ៣៣០",
    "ផ្លូវ ៥១៧",
    "ផ្លូវ ៧មករា",
    "ផ្លូវ ទួលគោក",
    "ផ្លូវ ស្ទឹងមានជ័យ",
    "ផ្លូវ ៣៥១",
];

const STREETS_EN: &[&str] = &[
    "Street 271",
    "Street 1986",
    "Monivong Blvd",
    "Russian Blvd",
    "Sihanouk Blvd",
    "Norodom Blvd",
    "Central Market Road",
    "Diamond Island Road",
];

const INDUSTRIAL_PARKS: &[&str] = &[
    "PPSEZ (Phnom Penh SEZ)",
    "Manhattan SEZ",
    "VSIP Industrial Park",
    "Sihanoukville SEZ",
    "Cambodia-Japan SEZ",
    "Royal Group SEZ",
    "Vattanac Industrial Park",
];

const LOCATION_NOTES_KM: &[&str] = &[
    "ជិតផ្សារទួលសង្កែ",
    "ក្បែរ​មហាវិថី​មុនីវង្ស",
    "ជាប់ផ្លូវធំ",
    "នៅក្បែររោងចក្រ",
    "ជិតសាលារៀន",
    "ក្រោយផ្សារចាស់",
];

const LOCATION_NOTES_EN: &[&str] = &[
    "Near main road",
    "Close to industrial zone",
    "Next to factory area",
    "Near school zone",
    "Behind market",
    "Beside warehouse",
];

const PHONE_PREFIXES: &[&str] = &["012", "015", "017", "010", "087", "089", "098", "099", "071"];

fn general_info(
    code: &str,
    context: &mut ResolutionContext,
    rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    match code {
        "company_name_km" => OverrideValue::text(khmer_company(company_pair_index(context, rng))),
        "company_name_en" => OverrideValue::text(english_company(company_pair_index(context, rng))),
        "company_name_reservation_attachment_id" => OverrideValue::image(MediaFolder::General),
        "contact_phone_number" => {
            let prefix = pick(rng, PHONE_PREFIXES);
            OverrideValue::text(format!("{prefix}{}", digits(rng, 6)))
        }
        "contact_street_no" => OverrideValue::text(pick(rng, STREETS_KM)),
        "contact_street_no_en" => OverrideValue::text(pick(rng, STREETS_EN)),
        "contact_land_number" => OverrideValue::text(rng.gen_range(100..=9999).to_string()),
        "contact_building_number" => OverrideValue::text(format!("B{}", rng.gen_range(1..=99))),
        "contact_house_number" => OverrideValue::text(rng.gen_range(1..=999).to_string()),
        "contact_industrial_park" | "contact_industrial_park_en" => {
            OverrideValue::text(pick(rng, INDUSTRIAL_PARKS))
        }
        "contact_location_description" => OverrideValue::text(pick(rng, LOCATION_NOTES_KM)),
        "contact_location_description_en" => OverrideValue::text(pick(rng, LOCATION_NOTES_EN)),
        "company_info_register_capital_value" => {
            Some(OverrideValue::Value(json!(rng.gen_range(5_000_000..=50_000_000))))
        }
        "company_info_total_share" | "company_info_value_per_share_value" => {
            Some(OverrideValue::Value(json!(rng.gen_range(100_000..=999_999))))
        }
        _ => None,
    }
}

const TARGET_NAMES_KM: &[&str] = &[
    "ក្រុមហ៊ុន ខេមបូឌា ឧស្សាហកម្ម",
    "ក្រុមហ៊ុន អភិវឌ្ឍន៍ ឧស្សាហកម្ម",
    "ក្រុមហ៊ុន សេដ្ឋកិច្ច កម្ពុជា",
    "ក្រុមហ៊ុន វិនិយោគ ឧស្សាហកម្ម",
    "ក្រុមហ៊ុន ផលិតកម្ម កម្ពុជា",
    "ក្រុមហ៊ុន បច្ចេកវិទ្យា ឧស្សាហកម្ម",
    "ក្រុមហ៊ុន ស្ថាបត្យកម្ម កម្ពុជា",
    "ក្រុមហ៊ុន អភិវឌ្ឍន៍ សេដ្ឋកិច្ច",
    "ក្រុមហ៊ុន ផលិតផល កម្ពុជា",
    "ក្រុមហ៊ុន វិស័យ ឧស្សាហកម្ម",
];

const TARGET_NAMES_EN: &[&str] = &[
    "Cambodia Industrial Corporation",
    "Cambodia Development Industries",
    "Khmer Economic Ventures",
    "Cambodia Manufacturing Group",
    "Indo-Khmer Industrial Co.",
    "Cambodia Tech Industries",
    "Mekong Industrial Holdings",
    "Cambodia Growth Corporation",
    "Khmer Production Enterprises",
    "Cambodia Sector Industries",
];

const OUTPUT_MARKETS: &[&str] = &[
    "United States",
    "Canada",
    "Germany",
    "France",
    "Australia",
    "Vietnam",
    "Thailand",
    "Japan",
    "South Korea",
    "China",
];

const TIMELINE_CODES: [&str; 4] = [
    "construction_start_datetime",
    "construction_end_datetime",
    "equipping_start_datetime",
    "production_start_datetime",
];

const CAPITAL_COST_CODES: [&str; 5] = [
    "construction_cost",
    "building_cost",
    "equipment_production_cost",
    "equipment_stationery_cost",
    "equipment_other_cost",
];

/// Construction, equipping and production dates in sequence, generated once per build.
fn timeline_value(code: &str, context: &mut ResolutionContext, rng: &mut dyn RngCore) -> Value {
    if let Some(existing) = context.get(code) {
        return existing.clone();
    }
    let start = today() + Duration::days(7);
    let end = start + Duration::days(rng.gen_range(30..=120));
    let equipping = end + Duration::days(rng.gen_range(7..=45));
    let production = equipping + Duration::days(rng.gen_range(7..=45));

    for (key, date) in TIMELINE_CODES
        .iter()
        .zip([start, end, equipping, production])
    {
        if !context.has_value(key) {
            context.insert(*key, Value::String(format_date(date)));
        }
    }
    context.get(code).cloned().unwrap_or(Value::Null)
}

fn invt_info(
    code: &str,
    context: &mut ResolutionContext,
    rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    match code {
        "investment_target_km" => OverrideValue::text(pick(rng, TARGET_NAMES_KM)),
        "investment_target_en" => OverrideValue::text(pick(rng, TARGET_NAMES_EN)),
        "investment_output_market" => OverrideValue::text(pick(rng, OUTPUT_MARKETS)),
        "total_investment_capital" => {
            let total: f64 = CAPITAL_COST_CODES
                .iter()
                .map(|cost| context.number(cost))
                .sum();
            Some(OverrideValue::Value(json!(round2(total))))
        }
        code if TIMELINE_CODES.contains(&code) => {
            Some(OverrideValue::Value(timeline_value(code, context, rng)))
        }
        "sez_and_industrial_park_code" => OverrideValue::text("Vattanak I Industrial Park"),
        "location_document_info_attachment_id" | "building_plan_info_attachment_id" => {
            OverrideValue::attachment(MediaFolder::General)
        }
        _ => None,
    }
}

const LOCATION_STREETS_KM: &[&str] = &[
    "ផ្លូវជាតិលេខ៤",
    "ផ្លូវជាតិលេខ៥",
    "ផ្លូវជាតិលេខ៦",
    "ផ្លូវ ២៧១",
    "ផ្លូវ ៣៧០",
    "ផ្លូវ ៥៩៨",
    "ផ្លូវ ២០០៤",
    "មហាវិថី ព្រះមុនីវង្ស",
    "មហាវិថី សម្តេចតេជោ",
    "ផ្លូវ វេង ស្រេង",
];

const LOCATION_STREETS_EN: &[&str] = &[
    "National Road No.4",
    "National Road No.5",
    "National Road No.6",
    "Street 271",
    "Street 598",
    "Street 2004",
    "Veng Sreng Blvd",
    "Monivong Blvd",
    "Russian Blvd",
    "Sihanouk Blvd",
    "Hanoi Road",
];

fn investment_location(
    code: &str,
    _context: &mut ResolutionContext,
    rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    match code {
        "investment_location_land_number" => {
            let suffix = pick(rng, &["", "-A", "-B", "E", "W"]);
            OverrideValue::text(format!("{}{suffix}", rng.gen_range(100..=9999)))
        }
        "investment_location_house_number" => {
            let suffix = pick(rng, &["", "A", "B", "-1", "-2", "/1", "/2"]);
            OverrideValue::text(format!("No.{}{suffix}", rng.gen_range(1..=999)))
        }
        "investment_location_building_number" => {
            let building = match rng.gen_range(0..3) {
                0 => String::new(),
                1 => format!("B{}", rng.gen_range(1..=50)),
                _ => format!("F{}", rng.gen_range(1..=20)),
            };
            OverrideValue::text(building)
        }
        "investment_location_street_number" => OverrideValue::text(pick(rng, LOCATION_STREETS_KM)),
        "investment_location_street_number_en" => {
            OverrideValue::text(pick(rng, LOCATION_STREETS_EN))
        }
        _ => None,
    }
}

const PARENT_COMPANIES: &[&str] = &[
    "Global Holdings Corporation",
    "Sunrise International Group Ltd.",
    "Eastern Manufacturing Corporation",
    "Silver River Global Industries",
    "Prime Asia Investment Holdings",
    "United Global Trading & Development",
    "Evergreen Industrial Group",
    "NorthStar International Ventures",
    "BlueStone Capital Partners",
    "Asia-Pacific Industrial Alliance",
];

const CORPORATE_ADDRESSES: &[&str] = &[
    "No. 45, Preah Norodom Blvd, Phnom Penh, Cambodia",
    "15th Floor, Central World Tower, Bangkok, Thailand",
    "District 1, Ho Chi Minh City, Vietnam",
    "Gangnam-daero, Seoul, South Korea",
    "Raffles Place, Singapore",
    "Street 215, Toul Kork, Phnom Penh, Cambodia",
];

const SHAREHOLDER_NOTES: &[&str] = &[
    "Primary shareholder",
    "Valid registration provided",
    "Corporate records verified",
    "Supporting documents attached",
    "AUTO-generated shareholder entry",
];

fn corporate_domain(rng: &mut dyn RngCore) -> String {
    let tld = pick(rng, &[".com", ".co", ".biz", ".corp"]);
    format!("{}{tld}", lowercase(rng, 8))
}

fn share_holder(
    code: &str,
    _context: &mut ResolutionContext,
    rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    match code {
        "share_holder_company_parent_registration_number" => OverrideValue::text(pick(
            rng,
            &["1234567890", "9876543210", "5555555555", "4444444444", "3333333333"],
        )),
        "share_holder_police_record_attachment_id"
        | "share_holder_attachment_id"
        | "share_holder_company_registration_attachment_id"
        | "share_holder_company_parent_record_attachment_id" => {
            OverrideValue::attachment(MediaFolder::General)
        }
        "legal_representative_certificate_attachment_id" => {
            OverrideValue::image(MediaFolder::FaceScan)
        }
        "share_holder_note" => OverrideValue::text(pick(rng, SHAREHOLDER_NOTES)),
        "share_holder_company_parent_name" => OverrideValue::text(pick(rng, PARENT_COMPANIES)),
        "share_holder_company_parent_address" => {
            OverrideValue::text(pick(rng, CORPORATE_ADDRESSES))
        }
        "share_holder_company_parent_email" => {
            let user = lowercase(rng, 6);
            OverrideValue::text(format!("{user}@{}", corporate_domain(rng)))
        }
        "share_holder_company_parent_website" => {
            OverrideValue::text(format!("www.{}", corporate_domain(rng)))
        }
        _ => None,
    }
}

fn board_member(
    code: &str,
    _context: &mut ResolutionContext,
    _rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    match code {
        "police_record_attachment_id" => OverrideValue::attachment(MediaFolder::General),
        "board_member_authorized_position_code_to_sign" => OverrideValue::text("manager"),
        "board_member_note" => OverrideValue::text("AUTO_NOTE"),
        _ => None,
    }
}

const FIRST_NAMES: &[&str] = &[
    "Sok", "Dara", "Vichea", "Sreymom", "Sreyleak", "Rith", "Kosal", "Malis", "Chenda", "Vanda",
];

const LAST_NAMES: &[&str] = &["Chan", "Kim", "Leng", "Heng", "Long", "Sao", "Sok", "Rin", "Vong"];

const APPLICANT_ADDRESSES: &[&str] = &[
    "Phnom Penh, Cambodia",
    "Kandal Province",
    "Takeo Province",
    "Battambang City",
    "Siem Reap City",
    "STREET 1234",
];

fn applicant_information(
    code: &str,
    _context: &mut ResolutionContext,
    rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    match code {
        "profile_photo_id" => OverrideValue::image(MediaFolder::FaceScan),
        "citizen_id_or_passport_attachment_id" => OverrideValue::attachment(MediaFolder::General),
        "fullname" => {
            let first = pick(rng, FIRST_NAMES);
            OverrideValue::text(format!("{first} {}", pick(rng, LAST_NAMES)))
        }
        "citizen_id_or_passport_number" => OverrideValue::text(format!("A{}", digits(rng, 9))),
        "citizen_id_or_passport_issued_datetime" => OverrideValue::text(format_date(
            today() - Duration::days(rng.gen_range(90..=1800)),
        )),
        "phone_number" => OverrideValue::text(digits(rng, 9)),
        "email" => {
            let name = lowercase(rng, 8);
            OverrideValue::text(format!("{name}@{}.com", lowercase(rng, 5)))
        }
        "address" => OverrideValue::text(pick(rng, APPLICANT_ADDRESSES)),
        _ => None,
    }
}

const PRODUCTS: &[(&str, &str)] = &[
    ("T-shirts & Polo Shirts", "610910"),
    ("Sneakers & Sports Shoes", "640319"),
    ("Jasmine Rice (Hom Mali)", "100630"),
    ("Natural Rubber Latex", "400110"),
    ("Cashew Nuts (Processed)", "080132"),
    ("Bicycles (Complete)", "871200"),
    ("Travel Bags & Backpacks", "420292"),
    ("Plastic Packaging Bags", "392321"),
    ("Wooden Furniture Sets", "940360"),
    ("Solar Panels 540W", "854143"),
    ("Frozen Shrimp (Vannamei)", "030617"),
    ("Black Pepper Whole", "090411"),
    ("Ceramic Floor Tiles", "690721"),
    ("LED Bulbs 9-15W", "853950"),
    ("Pharmaceutical Tablets", "300490"),
];

const PRODUCT_NOTES: &[&str] = &[
    "Main export product",
    "High demand in EU & USA",
    "100% Cambodian origin",
    "GSP/EBA eligible",
    "Organic certified",
    "Eco-friendly production",
];

fn product_and_labor(
    code: &str,
    _context: &mut ResolutionContext,
    rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    let (name, hs_prefix) = PRODUCTS[rng.gen_range(0..PRODUCTS.len())];
    match code {
        "product_output_name" => OverrideValue::text(name),
        "product_output_hs_code" => {
            OverrideValue::text(format!("{hs_prefix}{}", rng.gen_range(10..=99)))
        }
        "product_output_note" => OverrideValue::text(pick(rng, PRODUCT_NOTES)),
        _ => None,
    }
}

const ACCOMMODATION_NOTES: &[&str] = &[
    "N/A",
    "Not applicable",
    "No issue",
    "Standard operation",
    "Handled by contractor",
    "According to plan",
    "See attached document",
    "Controlled and monitored",
    "Comply with regulations",
    "On-site management",
];

fn utility_and_env(
    code: &str,
    _context: &mut ResolutionContext,
    rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    match code {
        "transport_mode" => OverrideValue::text(pick(
            rng,
            &["Truck", "Container truck", "Pickup", "Van", "Motorbike"],
        )),
        "dump_location" => OverrideValue::text(pick(
            rng,
            &[
                "Designated municipal landfill",
                "Approved disposal site",
                "On-site temporary storage (approved)",
            ],
        )),
        "noise_source" => OverrideValue::text(pick(
            rng,
            &[
                "Machinery operation",
                "Generators",
                "Vehicle movement",
                "Construction activities",
            ],
        )),
        "clearing_land" => OverrideValue::text(pick(
            rng,
            &[
                "No land clearing required",
                "Minor clearing within site boundary",
                "Clearing done with approval",
            ],
        )),
        "staff_accom_health_and_safety"
        | "staff_accom_sanitation"
        | "staff_accom_solids_waste_management" => {
            OverrideValue::text(pick(rng, ACCOMMODATION_NOTES))
        }
        _ => None,
    }
}

fn annex2_1(
    code: &str,
    _context: &mut ResolutionContext,
    _rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    (code == "equipment_material_excel_upload").then_some(OverrideValue::ListSheet {
        list_code: "equipment_material",
        folder: "តារាងតម្រូវការសម្ភារៈបរិក្ខារផលិតកម្ម",
        file_name: "1 - តារាងតម្រូវការសម្ភារៈបរិក្ខារផលិតកម្ម (ឧ.5.1 I + ឧ.5.1 II).xlsx",
    })
}

fn annex2_2(
    code: &str,
    _context: &mut ResolutionContext,
    _rng: &mut dyn RngCore,
) -> Option<OverrideValue> {
    (code == "product_input_excel_upload").then_some(OverrideValue::ListSheet {
        list_code: "product_input",
        folder: "តារាងតម្រូវការធាតុចូលផលិតកម្ម",
        file_name: "1 - តារាងតម្រូវការធាតុចូលផលិតកម្ម.xlsx",
    })
}

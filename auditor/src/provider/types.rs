//! Provider record shapes, deserialized as the reserved-capacity API
//! returns them (PascalCase keys, every scalar optional).

use serde::{Deserialize, Serialize};

/// Everything one polling cycle fetched for one region.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawSnapshot {
    #[serde(default)]
    pub region: String,
    pub taken_at: Option<String>,
    #[serde(default)]
    pub reserved_instances: Vec<RawReservation>,
    #[serde(default)]
    pub reserved_instances_listings: Vec<RawListing>,
    #[serde(default)]
    pub reserved_instances_modifications: Vec<RawModification>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawReservation {
    pub reserved_instances_id: String,
    pub availability_zone: Option<String>,
    pub scope: Option<String>,
    pub instance_type: Option<String>,
    pub instance_count: Option<i64>,
    pub instance_tenancy: Option<String>,
    pub duration: Option<i64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub fixed_price: Option<f64>,
    #[serde(default)]
    pub recurring_charges: Vec<RawRecurringCharge>,
    pub offering_class: Option<String>,
    pub offering_type: Option<String>,
    pub product_description: Option<String>,
    pub state: Option<String>,
    /// Listings the provider reports for this reservation. A reservation
    /// split off by a sale keeps pointing at its parent's listing.
    #[serde(default)]
    pub reserved_instances_listing_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawRecurringCharge {
    pub amount: Option<f64>,
    pub frequency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawListing {
    pub reserved_instances_listing_id: String,
    pub reserved_instances_id: String,
    pub create_date: Option<String>,
    pub status: Option<String>,
    pub status_message: Option<String>,
    #[serde(default)]
    pub instance_counts: Vec<RawInstanceCount>,
    #[serde(default)]
    pub price_schedules: Vec<RawPriceSchedule>,
    /// Schedule submitted when the listing was created, when the client
    /// could recover it from the provider's audit trail. Entries carry no
    /// `Active` flag.
    #[serde(default)]
    pub original_price_schedules: Vec<RawPriceSchedule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawInstanceCount {
    pub state: Option<String>,
    pub instance_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPriceSchedule {
    pub term: Option<i64>,
    pub price: Option<f64>,
    pub currency_code: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawModification {
    pub reserved_instances_modification_id: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub reserved_instances_ids: Vec<RawReservedInstancesId>,
    #[serde(default)]
    pub modification_results: Vec<RawModificationResult>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawReservedInstancesId {
    pub reserved_instances_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawModificationResult {
    /// Absent until the modification is fulfilled.
    pub reserved_instances_id: Option<String>,
    pub instance_count: Option<i64>,
}

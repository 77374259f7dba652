use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use temps_core::DBDateTime;

/// Archived copy of a revoked certificate. Written once, never updated.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "pki_revoked_certs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub cn: String,
    pub mail: Option<String>,
    pub ca_id: i32,
    pub ca_name: String,
    pub street_address: Option<String>,
    pub organisation: Option<String>,
    pub organisational_unit: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    #[serde(skip_serializing, default)]
    #[sea_orm(column_type = "Text")]
    pub key: String,
    #[sea_orm(column_type = "Text")]
    pub cert: String,
    pub profile_id: i32,
    pub profile_name: String,
    pub valid_until: DBDateTime,
    pub not_before: DBDateTime,
    pub date: DBDateTime,
    pub serial_number: i64,
    pub dns_names: Option<String>,
    pub ip_addresses: Option<String>,
    /// End of the revocation record's validity tail.
    pub revoked: DBDateTime,
    pub crl_reason: i32,
    pub subject: String,
    pub created_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pki_cas::Entity",
        from = "Column::CaId",
        to = "super::pki_cas::Column::Id"
    )]
    Ca,
    #[sea_orm(
        belongs_to = "super::pki_profiles::Entity",
        from = "Column::ProfileId",
        to = "super::pki_profiles::Column::Id"
    )]
    Profile,
}

impl Related<super::pki_cas::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ca.def()
    }
}

impl Related<super::pki_profiles::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Profile.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use temps_core::DBDateTime;

/// An active leaf certificate. Rows move to `pki_revoked_certs` on revocation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "pki_certs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub cn: String,
    pub mail: Option<String>, // comma separated
    pub ca_id: i32,
    pub ca_name: String,
    pub street_address: Option<String>,
    pub organisation: Option<String>,
    pub organisational_unit: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    /// PEM private key, empty when the certificate was signed from a CSR.
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
    pub scep: bool,
    pub csr: bool,
    pub alert: bool,
    #[sea_orm(unique)]
    pub subject: String,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
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

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}

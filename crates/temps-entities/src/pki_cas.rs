use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use temps_core::DBDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "pki_cas")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub cn: String,
    pub mail: Option<String>,
    pub organisation: Option<String>,
    pub organisational_unit: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub street_address: Option<String>,
    pub postal_code: Option<String>,
    pub key_type: String, // RSA, ECDSA, DSA
    pub key_size: i32,
    pub digest: i32,
    pub key_usage: Option<String>,
    pub extended_key_usage: Option<String>,
    pub days: i32,
    #[serde(skip_serializing, default)]
    #[sea_orm(column_type = "Text")]
    pub key: String,
    #[sea_orm(column_type = "Text")]
    pub cert: String,
    pub issuer_key_hash: String,
    pub issuer_name_hash: String,
    pub ocsp_url: Option<String>,
    /// Next serial number handed to a certificate signed by this CA.
    #[serde(skip_serializing, default)]
    pub serial_number: i64,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::pki_profiles::Entity")]
    Profiles,
    #[sea_orm(has_many = "super::pki_certs::Entity")]
    Certs,
}

impl Related<super::pki_profiles::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Profiles.def()
    }
}

impl Related<super::pki_certs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Certs.def()
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

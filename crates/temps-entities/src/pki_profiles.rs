use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use temps_core::DBDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "pki_profiles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub ca_id: i32,
    pub ca_name: String,
    pub mail: Option<String>,
    pub organisation: Option<String>,
    pub organisational_unit: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub street_address: Option<String>,
    pub postal_code: Option<String>,
    pub validity: i32,
    pub key_type: String,
    pub key_size: i32,
    pub digest: i32,
    pub key_usage: Option<String>,
    pub extended_key_usage: Option<String>,
    pub ocsp_url: Option<String>,
    pub p12_mail_password: bool,
    pub p12_mail_subject: Option<String>,
    pub p12_mail_from: Option<String>,
    pub p12_mail_header: Option<String>,
    pub p12_mail_footer: Option<String>,
    pub scep_enabled: bool,
    #[serde(skip_serializing, default)]
    pub scep_challenge_password: Option<String>,
    pub scep_days_before_renewal: i32,
    pub days_before_renewal: i32,
    pub renewal_mail: bool,
    pub days_before_renewal_mail: i32,
    pub renewal_mail_subject: String,
    pub renewal_mail_from: Option<String>,
    pub renewal_mail_header: Option<String>,
    pub renewal_mail_footer: Option<String>,
    pub revoked_valid_until: i32,
    pub cloud_enabled: bool,
    pub cloud_service: Option<String>,
    pub scep_server_enabled: bool,
    pub scep_server_id: i32,
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
        belongs_to = "super::pki_scep_servers::Entity",
        from = "Column::ScepServerId",
        to = "super::pki_scep_servers::Column::Id"
    )]
    ScepServer,
    #[sea_orm(has_many = "super::pki_certs::Entity")]
    Certs,
}

impl Related<super::pki_cas::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ca.def()
    }
}

impl Related<super::pki_scep_servers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScepServer.def()
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

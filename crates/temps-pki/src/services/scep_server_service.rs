//! Remote SCEP servers a profile may delegate enrollment to.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use temps_database::DbConnection;
use temps_entities::{pki_profiles, pki_scep_servers};
use tracing::info;

use crate::error::{PkiError, PkiResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScepServer {
    pub name: String,
    pub url: String,
    pub shared_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScepServerUpdate {
    pub url: Option<String>,
    pub shared_secret: Option<String>,
}

pub struct ScepServerService {
    db: Arc<DbConnection>,
}

impl ScepServerService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, request: NewScepServer) -> PkiResult<pki_scep_servers::Model> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(PkiError::validation("SCEP server name is required"));
        }
        let server = pki_scep_servers::ActiveModel {
            name: Set(name),
            url: Set(request.url.trim().to_string()),
            shared_secret: Set(request.shared_secret),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        info!("Created SCEP server {} (id {})", server.name, server.id);
        Ok(server)
    }

    pub async fn get(&self, id: i32) -> PkiResult<pki_scep_servers::Model> {
        pki_scep_servers::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("SCEP server", id))
    }

    pub async fn get_by_name(&self, name: &str) -> PkiResult<pki_scep_servers::Model> {
        pki_scep_servers::Entity::find()
            .filter(pki_scep_servers::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("SCEP server", name))
    }

    pub async fn list(&self) -> PkiResult<Vec<pki_scep_servers::Model>> {
        Ok(pki_scep_servers::Entity::find()
            .order_by_asc(pki_scep_servers::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn update(
        &self,
        id: i32,
        update: ScepServerUpdate,
    ) -> PkiResult<pki_scep_servers::Model> {
        let server = self.get(id).await?;
        let mut active: pki_scep_servers::ActiveModel = server.into();
        if let Some(url) = update.url {
            active.url = Set(url.trim().to_string());
        }
        if let Some(secret) = update.shared_secret {
            active.shared_secret = Set(secret);
        }
        let server = active.update(self.db.as_ref()).await?;

        info!("Updated SCEP server {} (id {})", server.name, server.id);
        Ok(server)
    }

    pub async fn update_by_name(
        &self,
        name: &str,
        update: ScepServerUpdate,
    ) -> PkiResult<pki_scep_servers::Model> {
        let server = self.get_by_name(name).await?;
        self.update(server.id, update).await
    }

    /// The default server and servers still bound to a profile stay.
    pub async fn delete(&self, id: i32) -> PkiResult<()> {
        if id == pki_scep_servers::DEFAULT_SCEP_SERVER_ID {
            return Err(PkiError::Conflict(
                "the default SCEP server cannot be deleted".to_string(),
            ));
        }
        let server = self.get(id).await?;
        let bound = pki_profiles::Entity::find()
            .filter(pki_profiles::Column::ScepServerId.eq(id))
            .count(self.db.as_ref())
            .await?;
        if bound > 0 {
            return Err(PkiError::Conflict(format!(
                "SCEP server {} is used by {} profile(s)",
                server.name, bound
            )));
        }

        pki_scep_servers::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        info!("Deleted SCEP server {} (id {})", server.name, id);
        Ok(())
    }
}

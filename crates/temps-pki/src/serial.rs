//! Per-CA serial numbers.

use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, QuerySelect, Set};
use temps_entities::pki_cas;
use tracing::debug;

use crate::error::{PkiError, PkiResult};

/// Serial of a CA's first self-signed certificate.
pub const CA_CERT_SERIAL: i64 = 1;
/// Leaf serials start past the CA certificate so the two never share one under the same issuer.
pub const FIRST_LEAF_SERIAL: i64 = CA_CERT_SERIAL + 1;

/// Hands out the CA's next serial and advances its counter.
///
/// Call inside the transaction that persists the signed certificate so a
/// failed issuance gives the number back. The row is read `FOR UPDATE`.
pub async fn allocate<C: ConnectionTrait>(conn: &C, ca_id: i32) -> PkiResult<i64> {
    let ca = pki_cas::Entity::find_by_id(ca_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| PkiError::not_found("CA", ca_id))?;

    let serial = ca.serial_number.max(FIRST_LEAF_SERIAL);
    let mut active: pki_cas::ActiveModel = ca.into();
    active.serial_number = Set(serial + 1);
    active.update(conn).await?;

    debug!("Allocated serial {} for CA {}", serial, ca_id);
    Ok(serial)
}

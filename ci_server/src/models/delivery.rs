//! ci.webhook.delivery — Provider delivery ids already dispatched.

use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::ci_webhook_deliveries;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ci_webhook_deliveries)]
pub struct NewCiWebhookDelivery {
    pub delivery_id: Uuid,
}

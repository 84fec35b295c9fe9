use crate::types::PhysicalKey;

// Well-known key for the persisted portion catalog.
pub const CATALOG_ROOT_PKEY: PhysicalKey = 0;

/// Name of the system column holding each row's commit plan step.
pub const PLAN_STEP_COLUMN_NAME: &str = "__plan_step";

/// Name of the system column holding each row's commit transaction id.
pub const TX_ID_COLUMN_NAME: &str = "__tx_id";

/// Name of the system column marking tombstone rows.
pub const DELETED_COLUMN_NAME: &str = "__deleted";

/// All reserved system column names, in stored order.
pub const SYSTEM_COLUMN_NAMES: [&str; 3] =
    [PLAN_STEP_COLUMN_NAME, TX_ID_COLUMN_NAME, DELETED_COLUMN_NAME];

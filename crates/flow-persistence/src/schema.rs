//! Diesel schema (hand-written; replaceable with `diesel print-schema`).
//!
//! Every table stores its owning domain entity as a single `data JSONB`
//! column, keyed/indexed by the identifiers the `RunStore` contract queries
//! by, mirroring the `event_log`/`workflow_step_artifacts` tables elsewhere
//! in this stack, which also persist a typed Rust enum as an opaque JSON
//! payload rather than decomposing it column by column.

diesel::table! {
    workflow_versions (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        data -> Jsonb,
    }
}

diesel::table! {
    block_definitions (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        slug -> Text,
        data -> Jsonb,
    }
}

diesel::table! {
    runs (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        workflow_version_id -> Uuid,
        status -> Text,
        data -> Jsonb,
    }
}

diesel::table! {
    step_runs (id) {
        id -> Uuid,
        run_id -> Uuid,
        step_id -> Uuid,
        sequence_number -> BigInt,
        data -> Jsonb,
    }
}

diesel::table! {
    block_group_runs (id) {
        id -> Uuid,
        run_id -> Uuid,
        block_group_id -> Uuid,
        data -> Jsonb,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    workflow_versions,
    block_definitions,
    runs,
    step_runs,
    block_group_runs,
);

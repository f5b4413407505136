table! {
    use diesel::sql_types::*;

    connectors (id) {
        id -> Int4,
        name -> Text,
        config -> Jsonb,
        refresh_freq -> Nullable<Int8>,
        disabled -> Bool,
        time_created -> Timestamp,
        time_updated -> Timestamp,
    }
}

table! {
    use diesel::sql_types::*;

    credentials (id) {
        id -> Int4,
        time_created -> Timestamp,
    }
}

table! {
    use diesel::sql_types::*;
    use crate::models::sql_types::IndexingStatusType;

    connector_credential_pairs (connector_id, credential_id) {
        connector_id -> Int4,
        credential_id -> Int4,
        time_created -> Timestamp,
        last_attempt_status -> Nullable<IndexingStatusType>,
        last_successful_index_time -> Nullable<Timestamp>,
    }
}

table! {
    use diesel::sql_types::*;
    use crate::models::sql_types::IndexModelStatusType;

    embedding_models (id) {
        id -> Int4,
        model_name -> Text,
        status -> IndexModelStatusType,
        time_created -> Timestamp,
    }
}

table! {
    use diesel::sql_types::*;
    use crate::models::sql_types::IndexingStatusType;

    index_attempts (id) {
        id -> Int4,
        connector_id -> Nullable<Int4>,
        credential_id -> Nullable<Int4>,
        embedding_model_id -> Int4,
        status -> IndexingStatusType,
        failure_reason -> Nullable<Text>,
        time_created -> Timestamp,
        time_updated -> Timestamp,
    }
}

joinable!(index_attempts -> embedding_models (embedding_model_id));

allow_tables_to_appear_in_same_query!(
    connectors,
    credentials,
    connector_credential_pairs,
    embedding_models,
    index_attempts,
);

diesel::table! {
    products (product_id) {
        product_id -> Varchar,
        available_stock -> Int4,
    }
}

diesel::table! {
    reservations (order_id) {
        order_id -> Varchar,
        product_id -> Varchar,
        quantity -> Int4,
        status -> Varchar,
        decided_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Int8,
        order_id -> Varchar,
        order_status -> Varchar,
        delivered_at -> Nullable<Timestamptz>,
        attempts -> Int4,
        last_error -> Nullable<Text>,
        next_retry_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    products,
    reservations,
    outbox_events,
);

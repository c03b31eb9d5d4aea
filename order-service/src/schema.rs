diesel::table! {
    orders (order_id) {
        order_id -> Varchar,
        user_id -> Varchar,
        product_id -> Varchar,
        quantity -> Int4,
        status -> Varchar,
        idempotency_key -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tokens (id) {
        id -> Integer,
        access_token -> Text,
        refresh_token -> Nullable<Text>,
        expires_at -> BigInt,
        created_at -> BigInt,
    }
}

diesel::table! {
    orders (id) {
        id -> Integer,
        symbol -> Text,
        qty -> Integer,
        side -> Text,
        #[sql_name = "type"]
        order_type -> Text,
        limit_price -> Nullable<Double>,
        status -> Text,
        timestamp -> Text,
    }
}

diesel::table! {
    trades (id) {
        id -> Integer,
        order_id -> Integer,
        symbol -> Text,
        qty -> Integer,
        price -> Double,
        timestamp -> Text,
    }
}

diesel::joinable!(trades -> orders (order_id));
diesel::allow_tables_to_appear_in_same_query!(orders, trades);

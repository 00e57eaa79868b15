//! Audit database schema.

diesel::table! {
    opportunities (id) {
        id -> Integer,
        opportunity_id -> Text,
        kind -> Text,
        symbol -> Text,
        strategy -> Text,
        projected_profit -> Double,
        projected_profit_pct -> Double,
        volume_quote -> Double,
        confidence -> Double,
        status -> Text,
        detected_at -> Text,
    }
}

diesel::table! {
    executions (id) {
        id -> Integer,
        execution_id -> Text,
        opportunity_id -> Text,
        status -> Text,
        realized_profit -> Double,
        total_fees -> Double,
        errors -> Text,
        started_at -> Text,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    trades (id) {
        id -> Integer,
        execution_id -> Text,
        venue -> Text,
        symbol -> Text,
        side -> Text,
        requested_amount -> Double,
        filled_amount -> Double,
        average_fill_price -> Double,
        fee -> Double,
        status -> Text,
        client_order_id -> Text,
        external_order_id -> Nullable<Text>,
        compensation -> Bool,
        created_at -> Text,
        filled_at -> Nullable<Text>,
    }
}

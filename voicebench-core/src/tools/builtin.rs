//! Pre-built mock tool catalogues for common scenarios.

use std::sync::Arc;

use serde_json::json;

use crate::adapter::JsonMap;
use crate::tools::registry::{MockToolRegistry, ToolMock};

/// Register the hotel-booking tool set.
pub fn register_hotel_booking_mocks(registry: &MockToolRegistry) {
    registry.register(
        "check_availability",
        ToolMock::new(Arc::new(|_: &JsonMap| {
            json!({
                "available": true,
                "rooms": [
                    { "type": "Standard Room", "price": 399 },
                    { "type": "King Room", "price": 499 },
                    { "type": "Suite", "price": 899 },
                ],
            })
        }))
        .latency_ms(200.0, 800.0),
    );

    registry.register(
        "create_booking",
        ToolMock::new(Arc::new(|args: &JsonMap| {
            json!({
                "booking_id": "BK20240115001",
                "status": "confirmed",
                "checkin": args.get("checkin").cloned().unwrap_or(json!("")),
                "nights": args.get("nights").cloned().unwrap_or(json!(1)),
            })
        }))
        .latency_ms(500.0, 2000.0)
        .failure_rate(0.1),
    );

    registry.register(
        "cancel_booking",
        ToolMock::new(Arc::new(|args: &JsonMap| {
            json!({
                "booking_id": args.get("booking_id").cloned().unwrap_or(json!("")),
                "status": "cancelled",
                "refund": true,
            })
        }))
        .latency_ms(300.0, 1000.0),
    );

    registry.register(
        "get_booking_details",
        ToolMock::new(Arc::new(|args: &JsonMap| {
            json!({
                "booking_id": args
                    .get("booking_id")
                    .cloned()
                    .unwrap_or(json!("BK20240115001")),
                "status": "confirmed",
                "room_type": "King Room",
                "checkin": "2024-01-19",
                "nights": 2,
                "price_total": 998,
            })
        }))
        .latency_ms(100.0, 400.0),
    );

    // Deliberately slow: exercises filler behavior on long tool calls.
    registry.register(
        "long_running_search",
        ToolMock::new(Arc::new(|_: &JsonMap| {
            json!({
                "results": [
                    { "hotel": "Grand Hotel", "distance": "0.5km", "price": 599 },
                    { "hotel": "City Inn", "distance": "1.2km", "price": 299 },
                ],
            })
        }))
        .latency_ms(3000.0, 8000.0),
    );
}

/// Register general-purpose mock tools.
pub fn register_general_mocks(registry: &MockToolRegistry) {
    registry.register(
        "get_weather",
        ToolMock::new(Arc::new(|args: &JsonMap| {
            json!({
                "location": args.get("location").cloned().unwrap_or(json!("Beijing")),
                "temperature": 22,
                "condition": "sunny",
                "humidity": 45,
            })
        }))
        .latency_ms(100.0, 300.0),
    );

    registry.register(
        "search_web",
        ToolMock::new(Arc::new(|args: &JsonMap| {
            json!({
                "query": args.get("query").cloned().unwrap_or(json!("")),
                "results": [
                    { "title": "Result 1", "snippet": "Some information..." },
                    { "title": "Result 2", "snippet": "More information..." },
                ],
            })
        }))
        .latency_ms(500.0, 1500.0),
    );

    registry.register(
        "send_email",
        ToolMock::new(Arc::new(|args: &JsonMap| {
            json!({
                "status": "sent",
                "to": args.get("to").cloned().unwrap_or(json!("")),
                "subject": args.get("subject").cloned().unwrap_or(json!("")),
            })
        }))
        .latency_ms(200.0, 600.0)
        .failure_rate(0.05),
    );

    registry.register(
        "set_reminder",
        ToolMock::new(Arc::new(|args: &JsonMap| {
            json!({
                "reminder_id": "REM001",
                "time": args.get("time").cloned().unwrap_or(json!("")),
                "message": args.get("message").cloned().unwrap_or(json!("")),
                "status": "set",
            })
        }))
        .latency_ms(50.0, 200.0),
    );

    registry.register(
        "get_calendar",
        ToolMock::new(Arc::new(|args: &JsonMap| {
            json!({
                "date": args.get("date").cloned().unwrap_or(json!("today")),
                "events": [
                    { "time": "09:00", "title": "Team standup" },
                    { "time": "14:00", "title": "Project review" },
                ],
            })
        }))
        .latency_ms(100.0, 400.0),
    );
}

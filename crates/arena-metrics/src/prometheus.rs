//! Prometheus text exposition format.
//!
//! Renders per-session gauges for scraping by a Prometheus server or
//! compatible agent.

use std::fmt::Write;

/// Point-in-time values exported for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGauges {
    pub session_id: String,
    pub target_rate: f64,
    pub eat_count: u64,
    pub emitter_running: bool,
}

/// Render session gauges into Prometheus text format.
///
/// Every series carries a `session` label. A leading `arena_sessions`
/// gauge reports the number of live sessions.
pub fn render_prometheus(sessions: &[SessionGauges]) -> String {
    let mut out = String::new();

    out.push_str("# HELP arena_sessions Number of live sessions.\n");
    out.push_str("# TYPE arena_sessions gauge\n");
    let _ = writeln!(out, "arena_sessions {}", sessions.len());

    out.push_str("# HELP arena_target_requests_per_second Configured synthetic request rate.\n");
    out.push_str("# TYPE arena_target_requests_per_second gauge\n");
    for s in sessions {
        let _ = writeln!(
            out,
            "arena_target_requests_per_second{{session=\"{}\"}} {:.2}",
            s.session_id, s.target_rate
        );
    }

    out.push_str("# HELP arena_eat_events_total Eat events received.\n");
    out.push_str("# TYPE arena_eat_events_total counter\n");
    for s in sessions {
        let _ = writeln!(
            out,
            "arena_eat_events_total{{session=\"{}\"}} {}",
            s.session_id, s.eat_count
        );
    }

    out.push_str("# HELP arena_load_emitter_running Whether the load emitter is running (0/1).\n");
    out.push_str("# TYPE arena_load_emitter_running gauge\n");
    for s in sessions {
        let _ = writeln!(
            out,
            "arena_load_emitter_running{{session=\"{}\"}} {}",
            s.session_id,
            u8::from(s.emitter_running)
        );
    }

    out
}

/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */

/// Empty slice: trace all connections, positive values: specific connection Ids, `[u32::MAX]`: disable tracing.
pub fn check_trace_connection(trace_connections: &[u32], connection_id: u32) -> bool {
    trace_connections.contains(&connection_id) || trace_connections.is_empty()
}

/// Debug event for one connection, prefixed with `[connection_id]`, emitted only if the connection is traced.
#[macro_export]
macro_rules! trace_connection {
    ($trace_connections: expr, $connection_id: expr, $format_pattern: expr $(, $arg: expr)* $(,)?) => {
        if $crate::trace_macro::check_trace_connection($trace_connections, $connection_id) {
            tracing::debug!("[{}]: {}", $connection_id, format_args!($format_pattern $(, $arg)*));
        }
    };
}

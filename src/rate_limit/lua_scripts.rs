/// Lua script for atomic increment-and-expire
///
/// Increments the counter and, when the key is new (or somehow lost its
/// expiry), sets the window expiry. Runs as a single Redis command, so
/// concurrent callers from any number of processes observe a strict order.
///
/// KEYS[1] = the counter key
/// ARGV[1] = window duration (milliseconds)
///
/// Returns: [current count, remaining ttl (milliseconds)]
pub const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local window_ms = tonumber(ARGV[1])

local current = redis.call('INCR', key)

if current == 1 then
    redis.call('PEXPIRE', key, window_ms)
end

local ttl = redis.call('PTTL', key)
if ttl < 0 then
    redis.call('PEXPIRE', key, window_ms)
    ttl = window_ms
end

return {current, ttl}
"#;

/// Lua script for writing a marker without shortening its expiry
///
/// KEYS[1] = the marker key
/// ARGV[1] = value to store
/// ARGV[2] = requested ttl (milliseconds)
///
/// Returns: 1 if written, 0 if an existing longer expiry was kept
pub const SET_MARKER_SCRIPT: &str = r#"
local key = KEYS[1]
local value = ARGV[1]
local ttl_ms = tonumber(ARGV[2])

local current_ttl = redis.call('PTTL', key)
if current_ttl >= ttl_ms then
    return 0
end

redis.call('SET', key, value, 'PX', ttl_ms)
return 1
"#;

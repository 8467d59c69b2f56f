//! Redis Lua scripts for atomic operations

/// Lua script to add to a period total and issue tickets for every
/// threshold multiple crossed
///
/// Keys: [ranking_key, tickets_key]
/// Args: [member, amount, threshold, ttl_seconds]
///
/// Returns: tickets issued by this increment
pub const INCREMENT_WAGER_SCRIPT: &str = r#"
local ranking = KEYS[1]
local tickets = KEYS[2]
local member = ARGV[1]
local amount = tonumber(ARGV[2])
local threshold = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local old = tonumber(redis.call('ZSCORE', ranking, member) or '0')
local new = tonumber(redis.call('ZINCRBY', ranking, amount, member))
local issued = math.floor(new / threshold) - math.floor(old / threshold)

if issued > 0 then
  redis.call('HINCRBY', tickets, member, issued)
end

redis.call('EXPIRE', ranking, ttl)
redis.call('EXPIRE', tickets, ttl)

return issued
"#;

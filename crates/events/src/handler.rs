/// Execute an aggregate command deterministically (no IO, no async).
///
/// Combines decision and state evolution in one step: `handle` decides the
/// events, then each is `apply`d in order. Useful in aggregate unit tests and
/// inline processing; production paths go through the infra dispatcher, which
/// adds persistence, publication, and the optimistic concurrency check.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: cardflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}

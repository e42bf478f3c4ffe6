/// Execute an aggregate command in memory: decide, then apply each event.
///
/// No persistence and no publication. Domain tests use this to drive products
/// and orders through their lifecycles; the infra dispatcher runs the same
/// decide/apply cycle around the event store.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: agriconnect_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}

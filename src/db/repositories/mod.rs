mod conditions;
mod events;
mod measurements;
mod runs;

mod engine;
mod executor;
mod templating;

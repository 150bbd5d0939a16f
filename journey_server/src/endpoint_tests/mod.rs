mod mocks;
mod webhooks;

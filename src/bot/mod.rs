pub mod commands;
pub mod confirm;
pub mod data;
pub mod guard;

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, data::BotData, Error>;

pub fn commands() -> Vec<poise::Command<data::BotData, Error>> {
    vec![
        commands::sign::sign(),
        commands::transfer::transfer(),
        commands::profile::nickname(),
        commands::profile::mydata(),
        commands::profile::coinlog(),
        commands::bottle::bottle(),
        commands::function::function(),
        commands::help::help(),
        commands::owner::owner(),
        commands::admin::admin(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::function::find_function;

    #[test]
    fn test_every_command_is_registered_as_function() {
        for command in commands() {
            assert!(
                find_function(&command.name).is_some(),
                "command {} has no function entry",
                command.name
            );
        }
    }
}
